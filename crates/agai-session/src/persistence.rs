//! Snapshot persistence for the session registry.
//!
//! The registry is written as a whole: one JSON object mapping session ID to
//! [`Session`]. Backends implement [`SnapshotStore`]; the manager decides when
//! to call them. In disk mode a single background writer coalesces bursts of
//! mutations into one write.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::manager::Shared;
use crate::session::Session;

/// Full registry contents keyed by session ID.
pub type Snapshot = HashMap<String, Session>;

/// Trait for snapshot backends.
///
/// Methods are blocking; the manager calls them from a blocking task.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Read the last snapshot. `Ok(None)` means nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot.
    fn save(&self, sessions: &Snapshot) -> Result<()>;

    /// Whether saves actually keep anything. Non-durable stores get no
    /// background writer.
    fn is_durable(&self) -> bool {
        true
    }
}

/// Memory mode: nothing is loaded or saved.
#[derive(Debug, Clone, Default)]
pub struct NoPersistence;

impl SnapshotStore for NoPersistence {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(None)
    }

    fn save(&self, _sessions: &Snapshot) -> Result<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Disk mode: a JSON snapshot file.
///
/// Saves go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact. Concurrent saves
/// are serialized.
#[derive(Debug)]
pub struct FileSnapshot {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshot {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshot {
    fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, sessions: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec(sessions)?;

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        fs::write(&temp, &bytes)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Copy the registry under the read lock and hand it to the store.
pub(crate) async fn write_snapshot(shared: &Arc<Shared>) -> Result<usize> {
    let snapshot: Snapshot = shared.registry.read().sessions.clone();
    let count = snapshot.len();

    let store = Arc::clone(&shared.store);
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .map_err(|e| Error::Persistence(format!("snapshot task failed: {e}")))??;

    Ok(count)
}

/// Read the store's snapshot from a blocking task.
pub(crate) async fn read_snapshot(shared: &Arc<Shared>) -> Result<Option<Snapshot>> {
    let store = Arc::clone(&shared.store);
    tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|e| Error::Persistence(format!("snapshot task failed: {e}")))?
}

/// Debounced snapshot writer. One per manager, disk mode only.
///
/// Each dirty mark sets `pending` and notifies; the writer waits out the
/// debounce window, clears `pending` and writes once. On shutdown any
/// pending mark gets a final write.
pub(crate) async fn run_writer(shared: Arc<Shared>) {
    debug!("Snapshot writer started");
    let debounce = shared.config.persist_debounce;

    loop {
        tokio::select! {
            _ = shared.dirty.notified() => {}
            _ = shared.cancel.cancelled() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(debounce) => {}
            _ = shared.cancel.cancelled() => break,
        }

        if shared.pending.swap(false, Ordering::AcqRel) {
            match write_snapshot(&shared).await {
                Ok(count) => debug!(count, "Session snapshot written"),
                Err(e) => error!(error = %e, "Failed to write session snapshot"),
            }
        }
    }

    if shared.pending.swap(false, Ordering::AcqRel) {
        match write_snapshot(&shared).await {
            Ok(count) => info!(count, "Final session snapshot written"),
            Err(e) => error!(error = %e, "Failed to write final session snapshot"),
        }
    }

    debug!("Snapshot writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn snapshot_of(ids: &[&str]) -> Snapshot {
        ids.iter()
            .map(|id| (id.to_string(), Session::with_id(*id)))
            .collect()
    }

    #[test]
    fn test_no_persistence() {
        let store = NoPersistence;
        assert!(!store.is_durable());
        assert!(store.load().unwrap().is_none());
        store.save(&snapshot_of(&["a"])).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshot::new(dir.path().join("sessions.data"));
        assert!(store.is_durable());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_empty_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.data");
        fs::write(&path, "\n").unwrap();
        assert!(FileSnapshot::new(path).load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshot::new(dir.path().join("nested/sessions.data"));

        let mut sessions = snapshot_of(&["a", "b"]);
        if let Some(a) = sessions.get_mut("a") {
            a.login();
            a.store_data("cart", 2);
        }
        store.save(&sessions).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        let a = &loaded["a"];
        assert!(a.is_logged_in());
        assert_eq!(a.get_stored_data("cart"), Some(&Value::from(2)));
        assert_eq!(a.expiry, sessions["a"].expiry);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshot::new(dir.path().join("sessions.data"));

        store.save(&snapshot_of(&["a", "b"])).unwrap();
        store.save(&snapshot_of(&["c"])).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.data");
        fs::write(&path, "{not json").unwrap();

        let err = FileSnapshot::new(path).load().unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
