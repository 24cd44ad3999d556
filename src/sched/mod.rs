//! Feed refresh scheduling engine.
//!
//! The engine is self-perpetuating: schedule a feed once and each
//! completed refresh enqueues the next cycle. Components, from the inside
//! out:
//!
//! - [`plan`]: pure delay and priority computation
//! - [`queue`]: delayed job queue with replace-on-enqueue per feed
//! - [`lock`]: per-feed refresh locks with TTL
//! - [`rate_limit`]: per-domain request spacing
//! - [`retry`]: in-cycle retry policy with exponential backoff
//! - [`worker`]: worker pool executing refreshes
//! - [`service`]: the [`RefreshScheduler`] front end

pub mod lock;
pub mod plan;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod types;
pub mod worker;

pub use lock::{InMemoryTaskLocks, TaskLockManager};
pub use plan::{compute_delay, compute_priority};
pub use queue::JobQueue;
pub use rate_limit::DomainRateLimiter;
pub use retry::RetryPolicy;
pub use service::RefreshScheduler;
pub use types::{
    clamp_interval, Priority, RefreshJob, ScheduleOutcome, SchedulerStats, TaskResult,
    MAX_REFRESH_INTERVAL_MINUTES, MIN_REFRESH_INTERVAL_MINUTES,
};
pub use worker::{WorkerPool, WorkerStats};
