use serde::{Deserialize, Serialize};

use super::layout::StorageLayout;

/// When the log and checkpoint writers call `fsync`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// Sync after every log append and every checkpoint step (most durable).
    #[default]
    Full,
    /// Sync only at checkpoints; a crash may lose the unsynced log tail.
    Normal,
    /// No explicit syncs (fastest but least durable).
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
            Synchronous::Off => "off",
        }
    }

    /// Whether each log append is followed by a sync.
    pub fn sync_appends(self) -> bool {
        matches!(self, Synchronous::Full)
    }

    /// Whether checkpoint payload and superblock writes are synced.
    pub fn sync_checkpoints(self) -> bool {
        !matches!(self, Synchronous::Off)
    }
}

/// Configuration options supplied when opening the storage engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageOptions {
    /// Region sizes of the storage file.
    pub layout: StorageLayout,
    /// Sync policy for log appends and checkpoints.
    pub synchronous: Synchronous,
}

impl StorageOptions {
    /// Creates options with the default layout and full sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage layout.
    pub fn layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the sync policy.
    pub fn synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = synchronous;
        self
    }
}
