//! feedloop - self-scheduling RSS/Atom feed refresh engine
//!
//! Each feed schedules its own next refresh: a completed cycle enqueues
//! the following one, so no external ticker drives the system. Per-feed
//! locks guarantee at most one active refresh per feed, and a per-domain
//! rate limiter keeps the fetchers polite to origin servers.

pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod sched;
pub mod store;

pub use config::{Config, DatabaseConfig, FetchConfig, LoggingConfig, SchedulerConfig};
pub use error::{FeedLoopError, Result};
pub use fetch::{FeedFetcher, HttpFeedFetcher, ParsedArticle, ParsedFeed};
pub use sched::{
    InMemoryTaskLocks, Priority, RefreshJob, RefreshScheduler, ScheduleOutcome, SchedulerStats,
    TaskLockManager, TaskResult,
};
pub use store::{Feed, FeedStore, FetchStatus, MemoryFeedStore, NewArticle, NewFeed, SqliteFeedStore};
