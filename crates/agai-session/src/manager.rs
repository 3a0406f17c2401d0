//! The session manager: registry, LRU tracker, expiry heap and background
//! tasks behind one cloneable handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, StoreType};
use crate::error::Result;
use crate::expiry::{self, ExpiryHeap, NO_TARGET};
use crate::persistence::{self, FileSnapshot, NoPersistence, SnapshotStore};
use crate::pump::{LruOp, PumpMessage, UpdatePump};
use crate::registry::Registry;
use crate::session::Session;

/// Cookie value that asks for a brand-new session.
pub const EXPIRE_SENTINEL: &str = "expire";

/// Most queued LRU updates applied under one registry write lock.
const CONSUMER_BATCH: usize = 64;

/// State shared between the manager handles and the background tasks.
///
/// `registry` and `expiry` are separate locks and are never held together.
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) registry: RwLock<Registry>,
    pub(crate) expiry: Mutex<ExpiryHeap>,
    /// Deadline the scheduler is sleeping towards, epoch millis. Only read
    /// or written while `expiry` is locked.
    pub(crate) wait_target: AtomicI64,
    pub(crate) wakeup: Notify,
    pub(crate) dirty: Notify,
    pub(crate) pending: AtomicBool,
    pub(crate) pump: UpdatePump,
    pub(crate) store: Arc<dyn SnapshotStore>,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    /// Remove `session_id` if it is still registered and its current expiry
    /// has passed. Heap entries can be stale, so this re-checks both.
    pub(crate) fn expire_if_due(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            match registry.sessions.get(session_id) {
                Some(session) if session.is_expired_at(now) => {
                    registry.sessions.remove(session_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            debug!(session_id = %session_id, "Session expired");
            self.pump.try_send(session_id, LruOp::Remove);
            self.mark_dirty();
        }
        removed
    }

    /// Push an expiry onto the heap, waking the scheduler if it is sleeping
    /// towards a later deadline.
    fn schedule(&self, session_id: &str, expiry: DateTime<Utc>) {
        let mut heap = self.expiry.lock();
        heap.push(expiry, session_id);
        if expiry.timestamp_millis() < self.wait_target.load(Ordering::SeqCst) {
            self.wakeup.notify_one();
        }
    }

    fn mark_dirty(&self) {
        if self.store.is_durable() {
            self.pending.store(true, Ordering::Release);
            self.dirty.notify_one();
        }
    }
}

/// Cancels the background tasks once the last manager handle is dropped.
struct TaskGuard {
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Result of [`SessionManager::start_session`].
#[derive(Debug, Clone)]
pub struct StartedSession {
    /// The request's session, a copy of the registry entry.
    pub session: Session,
    /// Whether a new session was created and its cookie must be sent.
    pub issued: bool,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Sessions in the registry.
    pub sessions: usize,
    /// Configured capacity.
    pub max_sessions: usize,
    /// IDs in the LRU tracker. Lags `sessions` by the pending updates.
    pub tracked: usize,
    /// Heap entries, stale ones included.
    pub scheduled: usize,
    /// LRU updates dropped because the channel was full.
    pub dropped_updates: u64,
    pub store_type: StoreType,
}

/// Concurrent session registry with LRU eviction, timed expiry and optional
/// snapshot persistence.
///
/// Cloning is cheap; clones share the same registry. Background tasks stop
/// when [`SessionManager::shutdown`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
    tasks: Arc<TaskGuard>,
}

impl SessionManager {
    /// Start a manager with the store selected by `config.store_type`.
    ///
    /// In disk mode the snapshot file is loaded first. A snapshot that cannot
    /// be read is logged and the manager starts empty.
    pub async fn start(config: SessionConfig) -> Self {
        let store: Arc<dyn SnapshotStore> = match config.store_type {
            StoreType::Memory => Arc::new(NoPersistence),
            StoreType::Disk => Arc::new(FileSnapshot::new(config.store_path.clone())),
        };
        Self::with_store(config, store).await
    }

    /// Start a manager with an explicit snapshot backend.
    pub async fn with_store(config: SessionConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let (pump, rx) = UpdatePump::channel(config.effective_channel_capacity());
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            config,
            registry: RwLock::new(Registry::new()),
            expiry: Mutex::new(ExpiryHeap::new()),
            wait_target: AtomicI64::new(NO_TARGET),
            wakeup: Notify::new(),
            dirty: Notify::new(),
            pending: AtomicBool::new(false),
            pump,
            store,
            cancel: cancel.clone(),
        });

        let mut handles = vec![
            tokio::spawn(run_consumer(Arc::clone(&shared), rx)),
            tokio::spawn(expiry::run_scheduler(Arc::clone(&shared))),
        ];
        if shared.store.is_durable() {
            handles.push(tokio::spawn(persistence::run_writer(Arc::clone(&shared))));
        }

        let manager = Self {
            shared,
            tasks: Arc::new(TaskGuard {
                cancel,
                handles: Mutex::new(handles),
            }),
        };

        if manager.shared.store.is_durable() {
            match manager.load_all().await {
                Ok(count) => info!(count, "Sessions restored from snapshot"),
                Err(e) => warn!(error = %e, "Failed to load session snapshot, starting empty"),
            }
        }

        info!(
            max_sessions = manager.shared.config.effective_max_sessions(),
            store_type = %manager.shared.config.store_type,
            "Session manager started"
        );
        manager
    }

    /// The manager's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Create a guest session with a fresh ID. It is not stored.
    pub fn new_session(&self) -> Result<Session> {
        Session::new()
    }

    /// Copy of a live session, marking it most recently used.
    ///
    /// Sessions past their expiry are treated as absent even before the
    /// scheduler removes them.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let session = {
            let registry = self.shared.registry.read();
            registry
                .sessions
                .get(session_id)
                .filter(|s| !s.is_expired_at(Utc::now()))
                .cloned()
        }?;
        self.shared.pump.try_send(session_id, LruOp::Move);
        Some(session)
    }

    /// Whether a live session is registered under `session_id`. Does not
    /// affect recency.
    pub fn contains(&self, session_id: &str) -> bool {
        self.shared
            .registry
            .read()
            .sessions
            .get(session_id)
            .is_some_and(|s| !s.is_expired_at(Utc::now()))
    }

    /// Insert or overwrite a session.
    ///
    /// If `session_id` is new and the registry is full, the least recently
    /// used session is evicted first and its ID returned.
    pub fn store(&self, session_id: &str, session: Session) -> Option<String> {
        let expiry = session.expiry;
        let max = self.shared.config.effective_max_sessions();

        let (is_new, evicted) = {
            let mut registry = self.shared.registry.write();
            let is_new = !registry.sessions.contains_key(session_id);
            let evicted = if is_new && registry.sessions.len() >= max {
                registry.evict_one()
            } else {
                None
            };
            registry.sessions.insert(session_id.to_string(), session);
            (is_new, evicted)
        };

        self.shared.schedule(session_id, expiry);

        if let Some(victim) = &evicted {
            // Only matters when the victim was chosen without the tracker.
            self.shared.pump.try_send(victim, LruOp::Remove);
        }
        let op = if is_new { LruOp::Insert } else { LruOp::Move };
        self.shared.pump.try_send(session_id, op);
        self.shared.mark_dirty();

        evicted
    }

    /// Write back a session that is already registered.
    ///
    /// Unlike [`store`](Self::store) this never inserts: if `session_id` was
    /// removed, evicted or has expired since it was read, nothing changes
    /// and `false` is returned.
    pub fn update(&self, session_id: &str, session: Session) -> bool {
        let expiry = session.expiry;
        let now = Utc::now();

        let rescheduled = {
            let mut registry = self.shared.registry.write();
            let Some(current) = registry
                .sessions
                .get_mut(session_id)
                .filter(|s| !s.is_expired_at(now))
            else {
                return false;
            };
            let rescheduled = current.expiry != expiry;
            *current = session;
            rescheduled
        };

        if rescheduled {
            self.shared.schedule(session_id, expiry);
        }
        self.shared.pump.try_send(session_id, LruOp::Move);
        self.shared.mark_dirty();
        true
    }

    /// Remove a session. Its heap entry is left to expire as a no-op.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let removed = self.shared.registry.write().sessions.remove(session_id);
        if removed.is_some() {
            debug!(session_id = %session_id, "Session removed");
            self.shared.pump.try_send(session_id, LruOp::Remove);
            self.shared.mark_dirty();
        }
        removed
    }

    /// Resolve the session for a request carrying `cookie`.
    ///
    /// A known live ID yields that session, touched. An absent or unknown ID,
    /// or the [`EXPIRE_SENTINEL`], yields a new session with a cookie-length
    /// expiry that is already stored; `issued` is then `true`.
    pub fn start_session(&self, cookie: Option<&str>) -> Result<StartedSession> {
        if let Some(id) = cookie.filter(|id| !id.is_empty() && *id != EXPIRE_SENTINEL) {
            if let Some(mut session) = self.get(id) {
                session.touch();
                return Ok(StartedSession {
                    session,
                    issued: false,
                });
            }
            debug!(session_id = %id, "Unknown session cookie, issuing a new session");
        }

        let mut session = self.new_session()?;
        session.issue();
        let id = session.id.clone();
        self.store(&id, session.clone());
        debug!(session_id = %id, "New session issued");

        Ok(StartedSession {
            session,
            issued: true,
        })
    }

    /// Number of sessions in the registry, including expired ones the
    /// scheduler has not reached yet.
    pub fn len(&self) -> usize {
        self.shared.registry.read().sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.registry.read().sessions.is_empty()
    }

    /// Remove every session.
    pub fn clear(&self) {
        // Heap first: a store racing with this either lands after both
        // clears or is wiped by the registry clear.
        self.shared.expiry.lock().clear();
        self.shared.registry.write().clear();
        self.shared.mark_dirty();
    }

    /// Write the whole registry to the snapshot store now.
    pub async fn save_all(&self) -> Result<usize> {
        persistence::write_snapshot(&self.shared).await
    }

    /// Replace the registry with the stored snapshot.
    ///
    /// Expired sessions are skipped. If the snapshot holds more live sessions
    /// than the capacity, those closest to expiry are dropped. Returns the
    /// number of sessions loaded; a store with no snapshot loads zero and
    /// leaves the registry untouched.
    pub async fn load_all(&self) -> Result<usize> {
        let Some(snapshot) = persistence::read_snapshot(&self.shared).await? else {
            return Ok(0);
        };

        let now = Utc::now();
        let total = snapshot.len();
        let mut live: Vec<Session> = snapshot
            .into_iter()
            .filter(|(_, session)| !session.is_expired_at(now))
            .map(|(id, mut session)| {
                session.id = id;
                session
            })
            .collect();

        // Keep the freshest, then insert oldest first so they end up most
        // recently used.
        live.sort_by(|a, b| b.expiry.cmp(&a.expiry));
        live.truncate(self.shared.config.effective_max_sessions());
        live.reverse();

        let schedule: Vec<(DateTime<Utc>, String)> =
            live.iter().map(|s| (s.expiry, s.id.clone())).collect();
        let loaded = live.len();

        {
            let mut registry = self.shared.registry.write();
            registry.clear();
            for session in live {
                registry.lru.push_front(&session.id);
                registry.sessions.insert(session.id.clone(), session);
            }
        }

        {
            let mut heap = self.shared.expiry.lock();
            for (expiry, id) in schedule {
                heap.push(expiry, id);
            }
            self.shared.wakeup.notify_one();
        }

        if loaded < total {
            debug!(
                skipped = total - loaded,
                "Expired or excess sessions skipped while loading"
            );
        }
        Ok(loaded)
    }

    /// Wait until every LRU update queued so far has been applied.
    pub async fn flush_updates(&self) {
        self.shared.pump.flush().await;
    }

    /// Current counters.
    pub fn stats(&self) -> SessionStats {
        let (sessions, tracked) = {
            let registry = self.shared.registry.read();
            (registry.sessions.len(), registry.lru.len())
        };
        let scheduled = self.shared.expiry.lock().len();

        SessionStats {
            sessions,
            max_sessions: self.shared.config.effective_max_sessions(),
            tracked,
            scheduled,
            dropped_updates: self.shared.pump.dropped(),
            store_type: self.shared.config.store_type,
        }
    }

    /// Stop the background tasks and wait for them. In disk mode any
    /// unsaved change is written before this returns.
    pub async fn shutdown(&self) {
        self.tasks.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session background task failed");
            }
        }
        info!("Session manager stopped");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.shared.config)
            .field("sessions", &self.len())
            .finish()
    }
}

/// Applies queued LRU updates until shutdown.
async fn run_consumer(shared: Arc<Shared>, mut rx: mpsc::Receiver<PumpMessage>) {
    debug!("LRU update consumer started");
    let mut batch = Vec::with_capacity(CONSUMER_BATCH);

    loop {
        let received = tokio::select! {
            n = rx.recv_many(&mut batch, CONSUMER_BATCH) => n,
            _ = shared.cancel.cancelled() => break,
        };
        if received == 0 {
            break;
        }

        let mut acks = Vec::new();
        {
            let mut registry = shared.registry.write();
            for message in batch.drain(..) {
                match message {
                    PumpMessage::Update(event) => registry.apply(&event),
                    PumpMessage::Flush(ack) => acks.push(ack),
                }
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }

    debug!("LRU update consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::time::Duration;

    async fn manager(max: usize) -> SessionManager {
        SessionManager::start(SessionConfig::new().with_max_sessions(max)).await
    }

    fn session(id: &str) -> Session {
        Session::with_id(id).with_expiry(Utc::now() + TimeDelta::minutes(10))
    }

    #[tokio::test]
    async fn test_store_get_remove() {
        let manager = manager(10).await;
        manager.store("a", session("a"));

        assert_eq!(manager.get("a").map(|s| s.id), Some("a".to_string()));
        assert!(manager.contains("a"));
        assert!(manager.remove("a").is_some());
        assert!(manager.get("a").is_none());
        assert!(manager.remove("a").is_none());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let manager = manager(1).await;
        assert_eq!(manager.store("a", session("a")), None);
        assert_eq!(manager.store("a", session("a")), None);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_store_at_capacity_evicts() {
        let manager = manager(2).await;
        manager.store("a", session("a"));
        manager.store("b", session("b"));
        manager.flush_updates().await;

        assert_eq!(manager.store("c", session("c")).as_deref(), Some("a"));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_update_only_overwrites_live_sessions() {
        let manager = manager(1).await;
        manager.store("a", session("a"));

        let mut copy = manager.get("a").unwrap();
        copy.store_data("k", 1);
        assert!(manager.update("a", copy.clone()));
        assert_eq!(
            manager.get("a").unwrap().get_stored_data("k"),
            Some(&serde_json::Value::from(1))
        );

        // Removed while a copy was out: the write-back must not restore it.
        manager.remove("a");
        assert!(!manager.update("a", copy.clone()));
        assert!(!manager.contains("a"));

        // Nor may it take a slot from a live session at capacity.
        manager.store("b", session("b"));
        assert!(!manager.update("a", copy));
        assert!(manager.contains("b"));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_update_skips_expired_session() {
        let manager = manager(10).await;
        let stale = Session::with_id("old").with_expiry(Utc::now() - TimeDelta::seconds(1));
        manager
            .shared
            .registry
            .write()
            .sessions
            .insert("old".to_string(), stale.clone());

        assert!(!manager.update("old", stale.with_expiry(Utc::now() + TimeDelta::minutes(5))));
        assert!(!manager.contains("old"));
    }

    #[tokio::test]
    async fn test_update_reschedules_extended_expiry() {
        let manager = manager(10).await;
        manager.store("a", session("a"));

        let mut copy = manager.get("a").unwrap();
        copy.login();
        assert!(manager.update("a", copy));
        assert_eq!(manager.stats().scheduled, 2);
        assert!(manager.get("a").unwrap().is_logged_in());
    }

    #[tokio::test]
    async fn test_expired_but_unswept_is_absent() {
        let manager = manager(10).await;
        let stale = Session::with_id("old").with_expiry(Utc::now() - TimeDelta::seconds(1));
        {
            // Bypass the scheduler so the entry is still registered.
            manager
                .shared
                .registry
                .write()
                .sessions
                .insert("old".to_string(), stale);
        }

        assert!(manager.get("old").is_none());
        assert!(!manager.contains("old"));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_expire_if_due_ignores_refreshed_session() {
        let manager = manager(10).await;
        manager.store("a", session("a"));

        assert!(!manager.shared.expire_if_due("a", Utc::now()));
        assert!(manager.contains("a"));
        assert!(!manager.shared.expire_if_due("missing", Utc::now()));
    }

    #[tokio::test]
    async fn test_start_session_variants() {
        let manager = manager(10).await;

        let first = manager.start_session(None).unwrap();
        assert!(first.issued);
        assert!(manager.contains(&first.session.id));
        assert!(first.session.expiry - Utc::now() > TimeDelta::minutes(29));

        let again = manager.start_session(Some(&first.session.id)).unwrap();
        assert!(!again.issued);
        assert_eq!(again.session.id, first.session.id);

        let unknown = manager.start_session(Some("nope")).unwrap();
        assert!(unknown.issued);
        assert_ne!(unknown.session.id, "nope");

        let sentinel = manager.start_session(Some(EXPIRE_SENTINEL)).unwrap();
        assert!(sentinel.issued);
        assert_ne!(sentinel.session.id, first.session.id);
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let manager = manager(10).await;
        manager.store("a", session("a"));
        manager.store("b", session("b"));
        manager.flush_updates().await;

        let stats = manager.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.scheduled, 2);
        assert_eq!(stats.max_sessions, 10);
        assert_eq!(stats.store_type, StoreType::Memory);

        manager.clear();
        manager.flush_updates().await;
        assert!(manager.is_empty());
        assert_eq!(manager.stats().tracked, 0);
    }

    #[tokio::test]
    async fn test_memory_mode_save_and_load_are_noops() {
        let manager = manager(10).await;
        manager.store("a", session("a"));

        assert_eq!(manager.save_all().await.unwrap(), 1);
        assert_eq!(manager.load_all().await.unwrap(), 0);
        assert!(manager.contains("a"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let manager = manager(10).await;
        manager.store("a", session("a"));
        tokio::time::timeout(Duration::from_secs(5), manager.shutdown())
            .await
            .unwrap();

        // Registry stays readable after the tasks are gone.
        assert!(manager.contains("a"));
        // Flushing a stopped pump returns immediately.
        tokio::time::timeout(Duration::from_secs(1), manager.flush_updates())
            .await
            .unwrap();
    }
}
