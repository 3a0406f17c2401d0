//! Session registry for agai.
//!
//! This crate keeps server-side sessions for HTTP clients:
//! - A concurrent registry of [`Session`] values keyed by random ID
//! - LRU eviction once the configured capacity is reached
//! - Timed expiry driven by a min-heap and a background scheduler
//! - Optional whole-registry snapshots to a file, reloaded at startup
//!
//! Recency updates travel through a bounded channel and are applied by a
//! background task, so the request path never waits on LRU bookkeeping.
//!
//! # Example
//!
//! ```rust,ignore
//! use agai_session::{SessionConfig, SessionManager};
//!
//! let manager = SessionManager::start(SessionConfig::new().with_max_sessions(1000)).await;
//! let started = manager.start_session(cookie_value)?;
//! ```

mod config;
mod error;
mod expiry;
mod lru_tracker;
mod manager;
mod persistence;
mod pump;
mod registry;
mod session;

pub use config::{
    DEFAULT_MAX_SESSIONS, DEFAULT_PERSIST_DEBOUNCE, DEFAULT_STORE_PATH,
    DEFAULT_UPDATE_CHANNEL_CAPACITY, NEW_SESSION_TTL, SESSION_TTL, SessionConfig, StoreType,
};
pub use error::{Error, Result};
pub use expiry::{ExpiryHeap, IDLE_SLEEP};
pub use lru_tracker::LruTracker;
pub use manager::{EXPIRE_SENTINEL, SessionManager, SessionStats, StartedSession};
pub use persistence::{FileSnapshot, NoPersistence, Snapshot, SnapshotStore};
pub use pump::{LruEvent, LruOp};
pub use session::{GUEST_UID, Session, UID_KEY, generate_session_id};
