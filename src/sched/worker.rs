//! Worker pool: dequeues refresh jobs and executes them.
//!
//! Each worker runs one job at a time: take the feed's lock, wait on the
//! domain rate limiter, fetch, persist, then hand the feed back to the
//! scheduler for its next cycle. A failure in one feed's execution never
//! escapes that iteration.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{FetchConfig, SchedulerConfig};
use crate::fetch::FeedFetcher;
use crate::sched::lock::TaskLockManager;
use crate::sched::plan::compute_delay;
use crate::sched::queue::JobQueue;
use crate::sched::rate_limit::DomainRateLimiter;
use crate::sched::retry::RetryPolicy;
use crate::sched::types::{clamp_interval, Priority, RefreshJob, TaskResult};
use crate::store::{FeedStore, FetchStatus, NewArticle};
use crate::{FeedLoopError, Result};

/// Shared execution counters.
#[derive(Default)]
pub struct WorkerStats {
    /// Jobs currently executing.
    pub active: AtomicUsize,
    /// Terminal successes.
    pub succeeded: AtomicU64,
    /// Terminal failures (retries exhausted or non-retryable).
    pub failed: AtomicU64,
}

/// Bounded pool of refresh executors.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    locks: Arc<dyn TaskLockManager>,
    rate_limiter: Arc<DomainRateLimiter>,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn FeedStore>,
    retry: RetryPolicy,
    lock_ttl: Duration,
    scheduler_config: SchedulerConfig,
    fetch_config: FetchConfig,
    stats: Arc<WorkerStats>,
}

/// Lock TTL that survives a full refresh cycle.
///
/// Every attempt can spend the domain rate-limit wait plus the hard fetch
/// timeout, with all backoffs in between. The configured TTL is a floor,
/// never a ceiling below that budget: a lock expiring under a live worker
/// would let a second worker refresh the same feed concurrently.
fn cycle_lock_ttl(config: &SchedulerConfig, fetch: &FetchConfig, retry: &RetryPolicy) -> Duration {
    let per_attempt = fetch.hard_timeout() + config.domain_max_wait();
    let budget = per_attempt * retry.max_attempts() + retry.total_backoff_budget();
    config.lock_ttl().max(budget)
}

impl WorkerPool {
    /// Create a pool wired to the given collaborators.
    pub fn new(
        queue: Arc<JobQueue>,
        locks: Arc<dyn TaskLockManager>,
        rate_limiter: Arc<DomainRateLimiter>,
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<dyn FeedStore>,
        scheduler_config: SchedulerConfig,
        fetch_config: FetchConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&scheduler_config);
        let lock_ttl = cycle_lock_ttl(&scheduler_config, &fetch_config, &retry);
        Self {
            queue,
            locks,
            rate_limiter,
            fetcher,
            store,
            retry,
            lock_ttl,
            scheduler_config,
            fetch_config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Shared execution counters.
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Spawn the configured number of workers.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.scheduler_config.workers)
            .map(|index| {
                let pool = Arc::clone(&self);
                tokio::spawn(async move { pool.run_worker(index).await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>, index: usize) {
        debug!(worker = index, "worker started");
        loop {
            let job = self.queue.dequeue().await;
            self.stats.active.fetch_add(1, Ordering::SeqCst);
            self.process(job).await;
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Execute one dequeued job end to end.
    async fn process(&self, job: RefreshJob) {
        let holder = Uuid::new_v4();
        if !self.locks.acquire(job.feed_id, self.lock_ttl, holder).await {
            // The in-flight refresh will reschedule the feed itself on
            // completion. Dropping is the correct move, not a failure.
            let e = FeedLoopError::LockContention(job.feed_id);
            debug!(feed_id = job.feed_id, "{e}, dropping job");
            return;
        }

        // Everything between acquire and release stays inside run_locked so
        // the lock is released on every exit path.
        self.run_locked(&job).await;

        if !self.locks.release(job.feed_id, holder).await {
            debug!(feed_id = job.feed_id, "lock expired before release");
        }
    }

    async fn run_locked(&self, job: &RefreshJob) {
        // Reload the feed: the interval may have changed since enqueue, and
        // the feed may be gone entirely.
        let feed = match self.store.get_feed(job.feed_id).await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                let e = FeedLoopError::InvariantViolation(format!(
                    "feed {} disappeared between enqueue and execution",
                    job.feed_id
                ));
                warn!(feed_id = job.feed_id, "{e}, dropping job");
                return;
            }
            Err(e) => {
                error!(feed_id = job.feed_id, error = %e, "failed to load feed, rescheduling");
                // Re-anchor on now so a persistently failing store does not
                // spin the feed through the queue at zero delay.
                let mut retry = job.clone();
                retry.last_fetched_at = Some(Utc::now());
                self.reschedule(retry, job.refresh_interval_minutes);
                return;
            }
        };

        let result = self.execute(job).await;
        let now = Utc::now();
        let status = if result.success {
            FetchStatus::Success
        } else {
            FetchStatus::Failed
        };

        // Failures advance last_fetched_at too: the next attempt runs at
        // the normal interval, and the surfaced error is the user's cue to
        // intervene.
        if let Err(e) = self
            .store
            .update_feed_status(job.feed_id, job.owner_id, status, now, result.error.as_deref())
            .await
        {
            error!(feed_id = job.feed_id, error = %e, "failed to update feed status");
        }

        if result.success {
            self.stats.succeeded.fetch_add(1, Ordering::SeqCst);
            info!(
                feed_id = job.feed_id,
                feed = %job.feed_title,
                new_articles = result.article_count,
                duration_ms = result.duration.as_millis() as u64,
                "feed refreshed"
            );
        } else {
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
            warn!(
                feed_id = job.feed_id,
                feed = %job.feed_title,
                duration_ms = result.duration.as_millis() as u64,
                error = result.error.as_deref().unwrap_or("unknown"),
                "feed refresh failed"
            );
        }

        let mut next = RefreshJob::from_feed(&feed, Priority::Normal);
        next.last_fetched_at = Some(now);
        self.reschedule(next, feed.refresh_interval_minutes);
    }

    /// Enqueue the feed's next cycle at normal priority.
    fn reschedule(&self, mut job: RefreshJob, interval_minutes: u32) {
        let interval = clamp_interval(interval_minutes);
        let now = Utc::now();
        let delay = compute_delay(job.last_fetched_at, interval, now);
        job.refresh_interval_minutes = interval;
        job.priority = Priority::Normal;
        job.attempt = 0;
        debug!(
            feed_id = job.feed_id,
            delay_secs = delay.as_secs(),
            "rescheduling next cycle"
        );
        self.queue.enqueue(job, delay);
    }

    /// Run the fetch with in-cycle retries. The lock is held throughout.
    async fn execute(&self, job: &RefreshJob) -> TaskResult {
        let started = Instant::now();
        let mut last_error: Option<FeedLoopError> = None;
        let mut article_count = 0;
        let mut success = false;

        for attempt in 1..=self.retry.max_attempts() {
            match self.attempt_fetch(job).await {
                Ok(count) => {
                    article_count = count;
                    success = true;
                    break;
                }
                Err(e) => {
                    if self.retry.should_retry(&e, attempt) {
                        let backoff = self.retry.backoff_with_jitter(attempt);
                        debug!(
                            feed_id = job.feed_id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "fetch attempt failed, backing off"
                        );
                        last_error = Some(e);
                        tokio::time::sleep(backoff).await;
                    } else {
                        last_error = Some(e);
                        break;
                    }
                }
            }
        }

        TaskResult {
            success,
            article_count,
            duration: started.elapsed(),
            error: last_error.map(|e| e.to_string()),
        }
    }

    /// One fetch attempt: rate limit, fetch with hard timeout, persist.
    async fn attempt_fetch(&self, job: &RefreshJob) -> Result<usize> {
        self.rate_limiter
            .wait_for_domain(&job.feed_url, self.scheduler_config.domain_max_wait())
            .await?;

        let parsed = tokio::time::timeout(
            self.fetch_config.hard_timeout(),
            self.fetcher.fetch(&job.feed_url),
        )
        .await
        .map_err(|_| {
            FeedLoopError::RetryableFetch(format!(
                "fetch exceeded hard timeout of {}s",
                self.fetch_config.hard_timeout_secs
            ))
        })??;

        let articles: Vec<NewArticle> = parsed
            .articles
            .into_iter()
            .take(self.fetch_config.max_articles_per_fetch)
            .map(|article| {
                let url = article.dedup_url().to_string();
                NewArticle {
                    url,
                    title: article.title,
                    summary: article.summary,
                    author: article.author,
                    published_at: article.published_at,
                }
            })
            .collect();

        self.store
            .upsert_articles(job.feed_id, job.owner_id, &articles)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ParsedArticle, ParsedFeed};
    use crate::sched::lock::InMemoryTaskLocks;
    use crate::store::{MemoryFeedStore, NewFeed};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Fetcher scripted to fail a fixed number of times before succeeding.
    struct ScriptedFetcher {
        failures_before_success: u32,
        retryable: bool,
        calls: AtomicU32,
        articles: usize,
    }

    impl ScriptedFetcher {
        fn succeeding(articles: usize) -> Self {
            Self {
                failures_before_success: 0,
                retryable: true,
                calls: AtomicU32::new(0),
                articles,
            }
        }

        fn failing(retryable: bool) -> Self {
            Self {
                failures_before_success: u32::MAX,
                retryable,
                calls: AtomicU32::new(0),
                articles: 0,
            }
        }

        fn flaky(failures: u32, articles: usize) -> Self {
            Self {
                failures_before_success: failures,
                retryable: true,
                calls: AtomicU32::new(0),
                articles,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> Result<ParsedFeed> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return if self.retryable {
                    Err(FeedLoopError::RetryableFetch("HTTP 503".to_string()))
                } else {
                    Err(FeedLoopError::NonRetryableFetch("HTTP 404".to_string()))
                };
            }
            let articles = (0..self.articles)
                .map(|i| ParsedArticle {
                    guid: format!("guid-{i}"),
                    title: format!("Article {i}"),
                    link: Some(format!("https://example.com/articles/{i}")),
                    summary: None,
                    author: None,
                    published_at: None,
                })
                .collect();
            Ok(ParsedFeed {
                title: "Feed".to_string(),
                description: None,
                site_url: None,
                articles,
            })
        }
    }

    struct Harness {
        pool: Arc<WorkerPool>,
        queue: Arc<JobQueue>,
        locks: Arc<InMemoryTaskLocks>,
        store: Arc<MemoryFeedStore>,
    }

    fn harness(fetcher: Arc<ScriptedFetcher>) -> Harness {
        let queue = Arc::new(JobQueue::new());
        let locks = Arc::new(InMemoryTaskLocks::new());
        let store = Arc::new(MemoryFeedStore::new());
        let rate_limiter = Arc::new(DomainRateLimiter::new(Duration::from_millis(100)));
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            locks.clone(),
            rate_limiter,
            fetcher,
            store.clone(),
            SchedulerConfig::default(),
            FetchConfig::default(),
        ));
        Harness {
            pool,
            queue,
            locks,
            store,
        }
    }

    fn job_for(feed: &crate::store::Feed) -> RefreshJob {
        RefreshJob::from_feed(feed, Priority::Normal)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_refresh_updates_status_and_reschedules() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding(3));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F").with_interval(30));

        h.pool.process(job_for(&feed)).await;

        let updated = h.store.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(updated.last_fetch_status, Some(FetchStatus::Success));
        assert!(updated.last_fetch_error.is_none());
        assert!(updated.last_fetched_at.is_some());
        assert_eq!(h.store.article_count(), 3);
        assert_eq!(fetcher.calls(), 1);

        // Next cycle is queued at normal priority
        assert_eq!(h.queue.len(), 1);
        assert!(h.queue.contains(feed.id));

        // Lock is released
        assert!(h.locks.remaining_ttl(feed.id).await.is_none());
        assert_eq!(h.pool.stats().succeeded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_exhausts_budget_then_reschedules_normal() {
        let fetcher = Arc::new(ScriptedFetcher::failing(true));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F").with_interval(60));

        h.pool.process(job_for(&feed)).await;

        // Three attempts, no fourth backoff cycle
        assert_eq!(fetcher.calls(), 3);

        let updated = h.store.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(updated.last_fetch_status, Some(FetchStatus::Failed));
        assert!(updated
            .last_fetch_error
            .as_deref()
            .unwrap()
            .contains("HTTP 503"));
        // Failure still advances last_fetched_at
        assert!(updated.last_fetched_at.is_some());

        // Rescheduled at the normal interval, lock released
        assert_eq!(h.queue.len(), 1);
        assert!(h.locks.remaining_ttl(feed.id).await.is_none());
        assert_eq!(h.pool.stats().failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_terminal_immediately() {
        let fetcher = Arc::new(ScriptedFetcher::failing(false));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));

        h.pool.process(job_for(&feed)).await;

        assert_eq!(fetcher.calls(), 1);
        let updated = h.store.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(updated.last_fetch_status, Some(FetchStatus::Failed));
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_fetch_recovers_within_budget() {
        let fetcher = Arc::new(ScriptedFetcher::flaky(2, 1));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));

        h.pool.process(job_for(&feed)).await;

        assert_eq!(fetcher.calls(), 3);
        let updated = h.store.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(updated.last_fetch_status, Some(FetchStatus::Success));
        assert_eq!(h.pool.stats().succeeded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_contention_drops_job_silently() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding(1));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));

        // Another worker holds the lock
        let other = Uuid::new_v4();
        assert!(
            h.locks
                .acquire(feed.id, Duration::from_secs(180), other)
                .await
        );

        h.pool.process(job_for(&feed)).await;

        // No fetch, no status change, no re-enqueue
        assert_eq!(fetcher.calls(), 0);
        let updated = h.store.get_feed(feed.id).await.unwrap().unwrap();
        assert!(updated.last_fetch_status.is_none());
        assert!(h.queue.is_empty());
        // The other worker's lock is intact
        assert!(h.locks.remaining_ttl(feed.id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_feed_drops_job_without_reschedule() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding(1));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));
        let job = job_for(&feed);
        h.store.remove_feed(feed.id);

        h.pool.process(job).await;

        assert_eq!(fetcher.calls(), 0);
        assert!(h.queue.is_empty());
        assert!(h.locks.remaining_ttl(feed.id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_refresh_stores_no_duplicate_articles() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding(2));
        let h = harness(fetcher.clone());
        let feed = h
            .store
            .add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));

        h.pool.process(job_for(&feed)).await;
        assert_eq!(h.store.article_count(), 2);

        let feed = h.store.get_feed(feed.id).await.unwrap().unwrap();
        h.pool.process(job_for(&feed)).await;
        // Same articles again: idempotent no-op
        assert_eq!(h.store.article_count(), 2);
        assert_eq!(h.pool.stats().succeeded.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lock_ttl_covers_full_cycle_budget() {
        let config = SchedulerConfig::default();
        let fetch = FetchConfig::default();
        let retry = RetryPolicy::from_config(&config);

        let ttl = cycle_lock_ttl(&config, &fetch, &retry);
        let per_attempt = fetch.hard_timeout() + config.domain_max_wait();
        assert!(ttl >= per_attempt * retry.max_attempts() + retry.total_backoff_budget());
        assert!(ttl >= config.lock_ttl());
    }

    #[test]
    fn test_lock_ttl_raised_above_undersized_configuration() {
        let mut config = SchedulerConfig::default();
        config.lock_ttl_secs = 10;
        let retry = RetryPolicy::from_config(&config);

        // 3 attempts x (60s hard timeout + 30s max rate-limit wait)
        let ttl = cycle_lock_ttl(&config, &FetchConfig::default(), &retry);
        assert!(ttl >= Duration::from_secs(270));
    }
}
