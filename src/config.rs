//! Partition configuration loaded from TOML.
//!
//! ```toml
//! [storage]
//! path = "/var/lib/shardgraph/p1.db"
//! log_blocks = 524287
//! checkpoint_slot_bytes = 4294967296
//! synchronous = "full"
//!
//! [server]
//! checkpoint_interval_secs = 300
//! rpc_timeout_ms = 2000
//!
//! [log]
//! level = "info"
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{StorageLayout, StorageOptions, Synchronous};
use crate::types::GraphError;

/// Contents of a partition config file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Storage file and sizing.
    pub storage: StorageSection,
    /// Listener behavior.
    pub server: ServerSection,
    /// Logging.
    pub log: LogSection,
}

/// `[storage]`
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// Storage file.
    pub path: Option<PathBuf>,
    /// Log capacity in 4096-byte blocks.
    pub log_blocks: Option<u32>,
    /// Capacity of each of the two checkpoint slots.
    pub checkpoint_slot_bytes: Option<u64>,
    /// Sync policy.
    pub synchronous: Option<Synchronous>,
}

/// `[server]`
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Period of automatic checkpoints; absent or zero disables them.
    pub checkpoint_interval_secs: Option<u64>,
    /// Deadline for peer calls; absent or zero waits indefinitely.
    pub rpc_timeout_ms: Option<u64>,
}

/// `[log]`
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

impl NodeConfig {
    /// Loads `explicit`, or the default path if it exists, or built-in defaults.
    ///
    /// An explicit path that cannot be read is an error; a missing default file
    /// is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return read_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => read_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses config text.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Storage options with defaults filled in and the layout validated.
    pub fn storage_options(&self) -> Result<StorageOptions, ConfigError> {
        let defaults = StorageLayout::default();
        let layout = StorageLayout::new(
            self.storage.log_blocks.unwrap_or(defaults.log_blocks()),
            self.storage
                .checkpoint_slot_bytes
                .unwrap_or(defaults.checkpoint_slot_bytes()),
        )
        .map_err(ConfigError::Layout)?;
        Ok(StorageOptions::new()
            .layout(layout)
            .synchronous(self.storage.synchronous.unwrap_or_default()))
    }

    /// Automatic checkpoint period, if enabled.
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.server
            .checkpoint_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Peer call deadline, if any.
    pub fn rpc_timeout(&self) -> Option<Duration> {
        self.server
            .rpc_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

fn read_file(path: &Path) -> Result<NodeConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    NodeConfig::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid config TOML.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// Storage sizes are unusable.
    #[error("invalid storage layout: {0}")]
    Layout(GraphError),
}

/// `<config dir>/shardgraph/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("shardgraph").join("config.toml"))
}
