//! Scheduler front end.
//!
//! [`RefreshScheduler`] owns the queue, the lock table, the rate limiter
//! and the worker pool, and exposes the operations the rest of the system
//! calls: schedule a feed, cancel a pending refresh, bootstrap every feed
//! at startup, and read counters.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{FetchConfig, SchedulerConfig};
use crate::fetch::FeedFetcher;
use crate::sched::lock::{InMemoryTaskLocks, TaskLockManager};
use crate::sched::plan::{compute_delay, compute_priority};
use crate::sched::queue::JobQueue;
use crate::sched::rate_limit::DomainRateLimiter;
use crate::sched::types::{clamp_interval, RefreshJob, ScheduleOutcome, SchedulerStats};
use crate::sched::worker::{WorkerPool, WorkerStats};
use crate::store::FeedStore;
use crate::{FeedLoopError, Result};

/// Self-perpetuating refresh scheduler.
///
/// Once a feed is scheduled, every completed refresh enqueues the next
/// cycle; no external ticker drives the system.
pub struct RefreshScheduler {
    queue: Arc<JobQueue>,
    locks: Arc<dyn TaskLockManager>,
    pool: Arc<WorkerPool>,
    worker_stats: Arc<WorkerStats>,
    config: SchedulerConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
    store: Arc<dyn FeedStore>,
}

impl RefreshScheduler {
    /// Build a scheduler with an in-process lock table.
    pub fn new(
        scheduler_config: SchedulerConfig,
        fetch_config: FetchConfig,
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        let locks: Arc<dyn TaskLockManager> = Arc::new(InMemoryTaskLocks::new());
        Self::with_locks(scheduler_config, fetch_config, store, fetcher, locks)
    }

    /// Build a scheduler with a caller-provided lock manager.
    pub fn with_locks(
        scheduler_config: SchedulerConfig,
        fetch_config: FetchConfig,
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn FeedFetcher>,
        locks: Arc<dyn TaskLockManager>,
    ) -> Self {
        let queue = Arc::new(JobQueue::new());
        let rate_limiter = Arc::new(DomainRateLimiter::new(
            scheduler_config.domain_min_interval(),
        ));
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            locks.clone(),
            rate_limiter,
            fetcher,
            store.clone(),
            scheduler_config.clone(),
            fetch_config,
        ));
        let worker_stats = pool.stats();
        Self {
            queue,
            locks,
            pool,
            worker_stats,
            config: scheduler_config,
            workers: Mutex::new(Vec::new()),
            store,
        }
    }

    /// Spawn the worker pool. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        *workers = Arc::clone(&self.pool).spawn();
        info!(workers = self.config.workers, "scheduler started");
    }

    /// Abort all workers. In-flight jobs are dropped; their locks expire
    /// by TTL and the next bootstrap re-schedules the feeds.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    /// Schedule a feed's next refresh.
    ///
    /// With `force_immediate` the job runs as soon as a worker is free, at
    /// manual priority. Otherwise the delay is derived from the feed's
    /// interval and last fetch. Scheduling a feed that already has a
    /// pending job replaces it; scheduling a feed whose refresh is
    /// currently executing reports [`ScheduleOutcome::AlreadyRunning`]
    /// without touching the queue.
    pub async fn schedule(&self, feed_id: i64, force_immediate: bool) -> Result<ScheduleOutcome> {
        if let Some(remaining) = self.locks.remaining_ttl(feed_id).await {
            debug!(
                feed_id,
                remaining_secs = remaining.as_secs(),
                "refresh in flight, not scheduling"
            );
            return Ok(ScheduleOutcome::AlreadyRunning { remaining });
        }

        let feed = self
            .store
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| FeedLoopError::NotFound(format!("feed {feed_id}")))?;

        let now = Utc::now();
        let interval = clamp_interval(feed.refresh_interval_minutes);
        let priority = compute_priority(feed.last_fetched_at, interval, now, force_immediate);
        let delay = if force_immediate {
            Duration::ZERO
        } else {
            compute_delay(feed.last_fetched_at, interval, now)
        };

        let job = RefreshJob::from_feed(&feed, priority);
        self.queue.enqueue(job, delay);
        debug!(
            feed_id,
            delay_secs = delay.as_secs(),
            priority = ?priority,
            "feed scheduled"
        );
        Ok(ScheduleOutcome::Scheduled { delay, priority })
    }

    /// Remove a feed's pending job, if any.
    ///
    /// Always succeeds; returns whether a job was actually removed. Has no
    /// effect on a refresh that is already executing.
    pub fn cancel(&self, feed_id: i64) -> bool {
        let removed = self.queue.cancel(feed_id);
        if removed {
            debug!(feed_id, "pending refresh canceled");
        }
        removed
    }

    /// Bootstrap: schedule every feed (optionally one owner's feeds).
    ///
    /// Feeds are enqueued in batches with a short random pause between
    /// batches so a large installation does not dump its entire feed list
    /// on the queue in one instant. One bad feed never aborts the rest.
    /// Returns the number of feeds scheduled.
    pub async fn initialize_all(&self, owner_id: Option<i64>) -> Result<usize> {
        let feeds = self.store.list_feeds(owner_id).await?;
        let total = feeds.len();
        let mut scheduled = 0;

        let batch_size = self.config.startup_batch_size.max(1);
        for (index, batch) in feeds.chunks(batch_size).enumerate() {
            if index > 0 && self.config.startup_batch_jitter_ms > 0 {
                let pause = rand::rng().random_range(0..=self.config.startup_batch_jitter_ms);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
            for feed in batch {
                match self.schedule(feed.id, false).await {
                    Ok(ScheduleOutcome::Scheduled { .. }) => scheduled += 1,
                    Ok(ScheduleOutcome::AlreadyRunning { .. }) => {
                        debug!(feed_id = feed.id, "skipping feed with refresh in flight");
                    }
                    Err(e) => {
                        warn!(feed_id = feed.id, error = %e, "failed to schedule feed");
                    }
                }
            }
        }

        info!(total, scheduled, "startup scheduling complete");
        Ok(scheduled)
    }

    /// Current counters: pending, active, succeeded, failed.
    pub fn stats(&self) -> SchedulerStats {
        use std::sync::atomic::Ordering;
        SchedulerStats {
            pending: self.queue.len(),
            active: self.worker_stats.active.load(Ordering::SeqCst),
            succeeded: self.worker_stats.succeeded.load(Ordering::SeqCst),
            failed: self.worker_stats.failed.load(Ordering::SeqCst),
        }
    }
}
