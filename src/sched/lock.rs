//! Per-feed refresh locks.
//!
//! A worker must hold the feed's lock for the duration of one refresh;
//! this makes "at most one active refresh per feed" a hard guarantee.
//! Locks carry a TTL so a crashed worker cannot block a feed forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

/// Distributed mutual exclusion per feed.
///
/// Every operation must be atomic against the backing store: a single
/// check-and-set, never a separate check followed by a write.
#[async_trait]
pub trait TaskLockManager: Send + Sync {
    /// Acquire the lock for a feed: set-if-absent-or-expired with expiry.
    ///
    /// Returns `false` when a live lock is held by someone else. Contention
    /// is expected control flow, not an error.
    async fn acquire(&self, feed_id: i64, ttl: Duration, holder: Uuid) -> bool;

    /// Release the lock, but only if `holder` still owns it.
    ///
    /// The holder check prevents a slow worker from releasing a lock that
    /// expired and was re-acquired by another worker.
    async fn release(&self, feed_id: i64, holder: Uuid) -> bool;

    /// Remaining TTL of a live lock, or `None` when the feed is unlocked.
    async fn remaining_ttl(&self, feed_id: i64) -> Option<Duration>;
}

struct LockEntry {
    holder: Uuid,
    expires_at: Instant,
}

/// In-process lock table.
///
/// All three operations take the table mutex exactly once, which is what
/// makes each of them a single atomic check-and-set.
#[derive(Default)]
pub struct InMemoryTaskLocks {
    entries: Mutex<HashMap<i64, LockEntry>>,
}

impl InMemoryTaskLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TaskLockManager for InMemoryTaskLocks {
    async fn acquire(&self, feed_id: i64, ttl: Duration, holder: Uuid) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get(&feed_id) {
            Some(entry) if entry.expires_at > now => false,
            _ => {
                entries.insert(
                    feed_id,
                    LockEntry {
                        holder,
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }

    async fn release(&self, feed_id: i64, holder: Uuid) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&feed_id) {
            Some(entry) if entry.holder == holder => {
                entries.remove(&feed_id);
                true
            }
            _ => false,
        }
    }

    async fn remaining_ttl(&self, feed_id: i64) -> Option<Duration> {
        let entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.get(&feed_id).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.expires_at - now)
            } else {
                None
            }
        })
    }
}
