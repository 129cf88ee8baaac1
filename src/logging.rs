//! Process-wide tracing setup.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber once per process.
///
/// `RUST_LOG` wins when set; otherwise `level` is used, falling back to `info`
/// when it is absent or not a valid filter.
pub fn init_logging(level: Option<&str>) {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).try_init();
    });
}
