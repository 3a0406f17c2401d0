//! Recency index used to choose eviction victims.

use lru::LruCache;

/// Recency order over session IDs.
///
/// The tracker holds only IDs; the registry holds the sessions. It is not
/// internally synchronized: every mutation happens while the registry
/// write lock is held.
#[derive(Debug)]
pub struct LruTracker {
    order: LruCache<String, ()>,
}

impl LruTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }

    /// Move an ID to the most-recently-used position.
    ///
    /// Absent IDs are ignored; absence means the event raced with a removal.
    pub fn move_to_front(&mut self, session_id: &str) {
        self.order.promote(session_id);
    }

    /// Insert an ID at the most-recently-used position if it is not
    /// already tracked. Returns `true` if it was inserted.
    pub fn push_front(&mut self, session_id: &str) -> bool {
        if self.order.contains(session_id) {
            return false;
        }
        self.order.put(session_id.to_string(), ());
        true
    }

    /// Remove and return the least-recently-used ID.
    pub fn evict_back(&mut self) -> Option<String> {
        self.order.pop_lru().map(|(id, ())| id)
    }

    /// Stop tracking an ID.
    pub fn remove(&mut self, session_id: &str) -> bool {
        self.order.pop(session_id).is_some()
    }

    /// Whether an ID is tracked.
    pub fn contains(&self, session_id: &str) -> bool {
        self.order.contains(session_id)
    }

    /// Number of tracked IDs.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no IDs are tracked.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget every ID.
    pub fn clear(&mut self) {
        self.order.clear();
    }
}

impl Default for LruTracker {
    fn default() -> Self {
        Self::new()
    }
}
