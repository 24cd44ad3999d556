//! Scheduling types for feedloop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::store::Feed;

/// Minimum allowed refresh interval in minutes.
pub const MIN_REFRESH_INTERVAL_MINUTES: u32 = 1;

/// Maximum allowed refresh interval in minutes (one week).
pub const MAX_REFRESH_INTERVAL_MINUTES: u32 = 10_080;

/// Clamp a refresh interval into the allowed range.
pub fn clamp_interval(minutes: u32) -> u32 {
    minutes.clamp(MIN_REFRESH_INTERVAL_MINUTES, MAX_REFRESH_INTERVAL_MINUTES)
}

/// Priority tier of a refresh job.
///
/// Ordering matters: `Manual > Overdue > Normal`. Priority determines
/// dequeue preference among ready jobs, not correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Regular interval-driven refresh.
    Normal,
    /// The feed is more than twice its interval behind.
    Overdue,
    /// User-requested immediate refresh.
    Manual,
}

/// The unit of scheduled work: one pending refresh of one feed.
///
/// `feed_id` is the deduplication and lock key; at most one pending job
/// exists per feed at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshJob {
    /// Feed identity, also the dedup/lock key.
    pub feed_id: i64,
    /// Feed URL, denormalized for execution and logging.
    pub feed_url: String,
    /// Feed title, denormalized for logging.
    pub feed_title: String,
    /// Owning user, for tenant-scoped persistence calls.
    pub owner_id: i64,
    /// Last attempted fetch; `None` means never fetched.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Refresh interval in minutes, clamped to the allowed range.
    pub refresh_interval_minutes: u32,
    /// Priority tier.
    pub priority: Priority,
    /// Retry counter within the current cycle; resets each new cycle.
    #[serde(default)]
    pub attempt: u32,
}

impl RefreshJob {
    /// Build a job from a stored feed.
    pub fn from_feed(feed: &Feed, priority: Priority) -> Self {
        Self {
            feed_id: feed.id,
            feed_url: feed.url.clone(),
            feed_title: feed.title.clone(),
            owner_id: feed.owner_id,
            last_fetched_at: feed.last_fetched_at,
            refresh_interval_minutes: clamp_interval(feed.refresh_interval_minutes),
            priority,
            attempt: 0,
        }
    }
}

/// Result of one refresh execution.
///
/// Transient: consumed by the status update, never persisted as its own
/// entity.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Whether the refresh succeeded.
    pub success: bool,
    /// Number of newly stored articles.
    pub article_count: usize,
    /// Wall time of the execution, retries included.
    pub duration: Duration,
    /// Error message for a failed refresh.
    pub error: Option<String>,
}

/// Outcome of a schedule request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A pending job was (re)placed on the queue.
    Scheduled {
        /// Delay until the job becomes eligible.
        delay: Duration,
        /// Assigned priority tier.
        priority: Priority,
    },
    /// The feed's lock is currently held; a refresh is already in flight.
    AlreadyRunning {
        /// Remaining lock TTL.
        remaining: Duration,
    },
}

/// Scheduler observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Jobs waiting on the queue.
    pub pending: usize,
    /// Jobs currently executing.
    pub active: usize,
    /// Completed refreshes that succeeded.
    pub succeeded: u64,
    /// Completed refreshes that failed terminally.
    pub failed: u64,
}
