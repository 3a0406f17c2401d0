//! Configuration for the session manager.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Default maximum number of live sessions before LRU eviction.
pub const DEFAULT_MAX_SESSIONS: usize = 50_000;

/// Lifetime of a session once its cookie has been issued.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Lifetime of a freshly created session that has no cookie yet.
pub const NEW_SESSION_TTL: Duration = Duration::from_secs(30);

/// Default capacity of the LRU update channel.
pub const DEFAULT_UPDATE_CHANNEL_CAPACITY: usize = 1000;

/// Default delay between a mutation and the snapshot write it triggers.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default snapshot file used in disk mode.
pub const DEFAULT_STORE_PATH: &str = "sessions.data";

/// Where the registry keeps its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Sessions live in memory only and are lost on restart.
    #[default]
    Memory,
    /// Sessions are snapshotted to a file and reloaded at startup.
    Disk,
}

impl StoreType {
    /// Whether this store type writes snapshots.
    pub fn is_disk(&self) -> bool {
        matches!(self, StoreType::Disk)
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::Disk => write!(f, "disk"),
        }
    }
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreType::Memory),
            "disk" | "storage" => Ok(StoreType::Disk),
            other => Err(format!("unknown session store type '{other}'")),
        }
    }
}

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of sessions kept before the least recently used one
    /// is evicted. Values below 1 are treated as 1.
    pub max_sessions: usize,

    /// Whether sessions are kept in memory only or snapshotted to disk.
    pub store_type: StoreType,

    /// Snapshot file used when `store_type` is [`StoreType::Disk`].
    pub store_path: PathBuf,

    /// Capacity of the bounded LRU update channel. Events beyond this are
    /// dropped.
    pub update_channel_capacity: usize,

    /// How long the persistence writer waits after a mutation before
    /// writing, so bursts of mutations produce a single snapshot.
    pub persist_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            store_type: StoreType::Memory,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            update_channel_capacity: DEFAULT_UPDATE_CHANNEL_CAPACITY,
            persist_debounce: DEFAULT_PERSIST_DEBOUNCE,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the store type.
    pub fn with_store_type(mut self, store_type: StoreType) -> Self {
        self.store_type = store_type;
        self
    }

    /// Switch to disk mode with the given snapshot file.
    pub fn with_disk_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_type = StoreType::Disk;
        self.store_path = path.into();
        self
    }

    /// Set the LRU update channel capacity.
    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity;
        self
    }

    /// Set the persistence debounce delay.
    pub fn with_persist_debounce(mut self, debounce: Duration) -> Self {
        self.persist_debounce = debounce;
        self
    }

    /// Capacity with the lower bound applied.
    pub(crate) fn effective_max_sessions(&self) -> usize {
        self.max_sessions.max(1)
    }

    pub(crate) fn effective_channel_capacity(&self) -> usize {
        self.update_channel_capacity.max(1)
    }
}
