//! Expiry scheduling: a min-heap of deadlines and the loop that sweeps it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::manager::Shared;

/// How long the scheduler sleeps when there is nothing to expire.
pub const IDLE_SLEEP: Duration = Duration::from_secs(30 * 60);

/// Wait target meaning "not waiting on any deadline".
pub(crate) const NO_TARGET: i64 = i64::MAX;

/// Min-heap of `(expiry, session_id)` entries.
///
/// Entries are never removed when a session is removed or re-stored; a
/// popped entry only says "this ID may be due", and the registry decides.
#[derive(Debug, Default)]
pub struct ExpiryHeap {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
}

impl ExpiryHeap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a session for expiry.
    pub fn push(&mut self, expiry: DateTime<Utc>, session_id: impl Into<String>) {
        self.heap.push(Reverse((expiry, session_id.into())));
    }

    /// Earliest scheduled deadline.
    pub fn peek_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse((expiry, _))| *expiry)
    }

    /// Pop every entry whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, String)> {
        let mut due = Vec::new();
        while let Some(Reverse((expiry, _))) = self.heap.peek() {
            if *expiry > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    /// Number of scheduled entries, stale ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

enum Step {
    Idle,
    Wait(DateTime<Utc>),
    Expire(Vec<(DateTime<Utc>, String)>, DateTime<Utc>),
}

/// Sweep loop. Runs until the manager is shut down.
///
/// The heap lock is released before any registry lock is taken, so this
/// loop and `store` (registry lock, then heap lock) never hold both.
pub(crate) async fn run_scheduler(shared: Arc<Shared>) {
    debug!("Expiry scheduler started");

    loop {
        // Peeking and publishing the wait target happen under the heap lock,
        // the same lock `store` holds while comparing against the target.
        let step = {
            let mut heap = shared.expiry.lock();
            let now = Utc::now();
            match heap.peek_deadline() {
                None => {
                    shared.wait_target.store(NO_TARGET, Ordering::SeqCst);
                    Step::Idle
                }
                Some(deadline) if deadline <= now => Step::Expire(heap.pop_due(now), now),
                Some(deadline) => {
                    shared
                        .wait_target
                        .store(deadline.timestamp_millis(), Ordering::SeqCst);
                    Step::Wait(deadline)
                }
            }
        };

        let wait = match step {
            Step::Expire(due, now) => {
                let mut expired = 0usize;
                for (_, session_id) in due {
                    if shared.expire_if_due(&session_id, now) {
                        expired += 1;
                    }
                }
                if expired > 0 {
                    debug!(count = expired, "Expired sessions removed");
                }
                continue;
            }
            Step::Idle => IDLE_SLEEP,
            Step::Wait(deadline) => (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO),
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shared.wakeup.notified() => {
                trace!("Expiry scheduler woken early");
            }
            _ = shared.cancel.cancelled() => break,
        }
    }

    debug!("Expiry scheduler stopped");
}
