//! Delayed job queue keyed by feed ID.
//!
//! Jobs become eligible for dequeue only after their delay elapses.
//! Enqueueing a feed that already has a pending job atomically replaces
//! it, so scheduling is idempotent per feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::types::RefreshJob;

struct PendingJob {
    job: RefreshJob,
    ready_at: Instant,
    seq: u64,
}

/// In-process delayed queue with replace-on-enqueue semantics.
///
/// Not durable across restarts; the scheduler's `initialize_all` bootstrap
/// repopulates it at startup.
#[derive(Default)]
pub struct JobQueue {
    pending: Mutex<HashMap<i64, PendingJob>>,
    notify: Notify,
    seq: AtomicU64,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue a job, replacing any pending job for the same feed.
    ///
    /// The replacement happens under one lock acquisition, so concurrent
    /// callers scheduling the same feed cannot produce two pending jobs.
    pub fn enqueue(&self, job: RefreshJob, delay: Duration) {
        let entry = PendingJob {
            ready_at: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            job,
        };
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(entry.job.feed_id, entry);
        }
        self.notify.notify_waiters();
    }

    /// Remove the pending job for a feed, if any.
    ///
    /// Idempotent: canceling a feed with no pending job is a no-op. Has no
    /// effect on a job a worker has already dequeued.
    pub fn cancel(&self, feed_id: i64) -> bool {
        let removed = self.pending.lock().unwrap().remove(&feed_id).is_some();
        if removed {
            self.notify.notify_waiters();
        }
        removed
    }

    /// Wait for a job whose delay has elapsed and remove it from the queue.
    ///
    /// Among ready jobs, the highest priority wins; ties go to the job that
    /// became ready first, then to enqueue order.
    pub async fn dequeue(&self) -> RefreshJob {
        loop {
            // Register for wakeups before inspecting the map, otherwise an
            // enqueue between the check and the await is lost.
            let notified = self.notify.notified();

            let next_deadline = {
                let mut pending = self.pending.lock().unwrap();
                let now = Instant::now();

                let ready_key = pending
                    .values()
                    .filter(|p| p.ready_at <= now)
                    .max_by(|a, b| {
                        a.job
                            .priority
                            .cmp(&b.job.priority)
                            .then_with(|| b.ready_at.cmp(&a.ready_at))
                            .then_with(|| b.seq.cmp(&a.seq))
                    })
                    .map(|p| p.job.feed_id);

                if let Some(feed_id) = ready_key {
                    let entry = pending.remove(&feed_id).expect("ready job present");
                    return entry.job;
                }

                pending.values().map(|p| p.ready_at).min()
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Whether the queue has no pending jobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a specific feed has a pending job.
    pub fn contains(&self, feed_id: i64) -> bool {
        self.pending.lock().unwrap().contains_key(&feed_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::types::Priority;

    fn job(feed_id: i64, priority: Priority) -> RefreshJob {
        RefreshJob {
            feed_id,
            feed_url: format!("https://example.com/{feed_id}"),
            feed_title: format!("Feed {feed_id}"),
            owner_id: 1,
            last_fetched_at: None,
            refresh_interval_minutes: 60,
            priority,
            attempt: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_dequeue_immediate() {
        let queue = JobQueue::new();
        queue.enqueue(job(1, Priority::Normal), Duration::ZERO);
        let dequeued = queue.dequeue().await;
        assert_eq!(dequeued.feed_id, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_not_ready_early() {
        let queue = JobQueue::new();
        queue.enqueue(job(1, Priority::Normal), Duration::from_secs(60));

        let result =
            tokio::time::timeout(Duration::from_secs(30), queue.dequeue()).await;
        assert!(result.is_err(), "job must not be ready before its delay");

        // After the full delay it becomes ready
        let dequeued =
            tokio::time::timeout(Duration::from_secs(31), queue.dequeue()).await;
        assert_eq!(dequeued.unwrap().feed_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_replaces_pending() {
        let queue = JobQueue::new();
        queue.enqueue(job(1, Priority::Normal), Duration::from_secs(3600));
        let mut updated = job(1, Priority::Manual);
        updated.refresh_interval_minutes = 5;
        queue.enqueue(updated, Duration::ZERO);

        assert_eq!(queue.len(), 1);
        let dequeued = queue.dequeue().await;
        assert_eq!(dequeued.priority, Priority::Manual);
        assert_eq!(dequeued.refresh_interval_minutes, 5);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_wins_among_ready() {
        let queue = JobQueue::new();
        queue.enqueue(job(1, Priority::Normal), Duration::ZERO);
        queue.enqueue(job(2, Priority::Manual), Duration::ZERO);
        queue.enqueue(job(3, Priority::Overdue), Duration::ZERO);

        assert_eq!(queue.dequeue().await.feed_id, 2);
        assert_eq!(queue.dequeue().await.feed_id, 3);
        assert_eq!(queue.dequeue().await.feed_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending() {
        let queue = JobQueue::new();
        queue.enqueue(job(1, Priority::Normal), Duration::from_secs(60));
        assert!(queue.cancel(1));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_missing_is_noop() {
        let queue = JobQueue::new();
        assert!(!queue.cancel(42));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let q = queue.clone();
        let handle = tokio::spawn(async move { q.dequeue().await });

        // Give the consumer a chance to park
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(job(1, Priority::Normal), Duration::ZERO);

        let dequeued = handle.await.unwrap();
        assert_eq!(dequeued.feed_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_consumers_get_distinct_jobs() {
        let queue = std::sync::Arc::new(JobQueue::new());
        queue.enqueue(job(1, Priority::Normal), Duration::ZERO);
        queue.enqueue(job(2, Priority::Normal), Duration::ZERO);

        let q1 = queue.clone();
        let q2 = queue.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { q1.dequeue().await }),
            tokio::spawn(async move { q2.dequeue().await }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.feed_id, b.feed_id);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_extends_delay() {
        let queue = JobQueue::new();
        queue.enqueue(job(1, Priority::Normal), Duration::from_secs(1));
        // Replace with a much later job before the first becomes ready
        queue.enqueue(job(1, Priority::Normal), Duration::from_secs(120));

        let result = tokio::time::timeout(Duration::from_secs(60), queue.dequeue()).await;
        assert!(result.is_err(), "replaced job must honor the new delay");
    }
}
