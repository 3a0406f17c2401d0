//! Registry state: the session map and its recency index.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::lru_tracker::LruTracker;
use crate::pump::{LruEvent, LruOp};
use crate::session::Session;

/// Session map plus LRU tracker, guarded together by the manager's
/// registry lock so that they are consistent whenever either is mutated.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) sessions: HashMap<String, Session>,
    pub(crate) lru: LruTracker,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Remove the least recently used live session.
    ///
    /// Tail IDs that are no longer in the map are discarded. If the tracker
    /// has no live candidate, because updates were dropped under load, the
    /// session closest to expiry is evicted instead.
    pub(crate) fn evict_one(&mut self) -> Option<String> {
        while let Some(candidate) = self.lru.evict_back() {
            if self.sessions.remove(&candidate).is_some() {
                debug!(session_id = %candidate, "Evicting LRU session to make room");
                return Some(candidate);
            }
            trace!(session_id = %candidate, "Discarding stale LRU entry");
        }

        let fallback = self
            .sessions
            .iter()
            .min_by_key(|(_, session)| session.expiry)
            .map(|(id, _)| id.clone())?;
        self.sessions.remove(&fallback);
        debug!(
            session_id = %fallback,
            "LRU tracker empty, evicting session closest to expiry"
        );
        Some(fallback)
    }

    /// Apply one queued update to the tracker.
    pub(crate) fn apply(&mut self, event: &LruEvent) {
        let id = event.session_id.as_str();
        match event.op {
            LruOp::Move => {
                if self.lru.contains(id) {
                    self.lru.move_to_front(id);
                } else if self.sessions.contains_key(id) {
                    // Its insert event was dropped; start tracking it now.
                    self.lru.push_front(id);
                }
            }
            LruOp::Insert => {
                // The session may have been removed while the event was queued.
                if self.sessions.contains_key(id) {
                    self.lru.push_front(id);
                }
            }
            LruOp::Remove => {
                // A later store may have brought the ID back.
                if !self.sessions.contains_key(id) {
                    self.lru.remove(id);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.sessions.clear();
        self.lru.clear();
    }
}
