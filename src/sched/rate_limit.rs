//! Per-domain rate limiting.
//!
//! Requests to the same origin hostname are spaced at least a configured
//! minimum apart, across all workers. The check and the timestamp update
//! happen under one lock acquisition so concurrent workers cannot both
//! claim the same slot.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::trace;

use crate::{FeedLoopError, Result};

/// Maximum random jitter added to a rate limit wait, in milliseconds.
/// Spreads out workers that would otherwise wake at the same instant.
const WAIT_JITTER_MS: u64 = 50;

/// Shared per-hostname request spacing.
pub struct DomainRateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl DomainRateLimiter {
    /// Create a limiter enforcing `min_interval` between requests per host.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Extract the hostname a URL will hit.
    pub fn host_of(url: &str) -> Result<String> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FeedLoopError::NonRetryableFetch(format!("invalid URL: {e}")))?;
        parsed
            .host_str()
            .map(|h| h.to_lowercase())
            .ok_or_else(|| FeedLoopError::NonRetryableFetch("URL has no host".to_string()))
    }

    /// Atomically claim a request slot for `host`.
    ///
    /// On success the host's timestamp is advanced in the same critical
    /// section. On contention, returns the remaining wait.
    fn try_reserve(&self, host: &str) -> std::result::Result<(), Duration> {
        let mut last_request = self.last_request.lock().unwrap();
        let now = Instant::now();
        match last_request.get(host) {
            Some(&last) if now < last + self.min_interval => {
                Err(last + self.min_interval - now)
            }
            _ => {
                last_request.insert(host.to_string(), now);
                Ok(())
            }
        }
    }

    /// Wait until a request to `url`'s host is allowed, then claim the slot.
    ///
    /// Returns the total time waited. Fails with
    /// [`FeedLoopError::RateLimitTimeout`] when the wait would exceed
    /// `max_wait`.
    pub async fn wait_for_domain(&self, url: &str, max_wait: Duration) -> Result<Duration> {
        let host = Self::host_of(url)?;
        let started = Instant::now();

        loop {
            match self.try_reserve(&host) {
                Ok(()) => {
                    let waited = started.elapsed();
                    if waited > Duration::ZERO {
                        trace!(host = %host, waited_ms = waited.as_millis() as u64, "rate limit wait complete");
                    }
                    return Ok(waited);
                }
                Err(remaining) => {
                    if started.elapsed() + remaining > max_wait {
                        return Err(FeedLoopError::RateLimitTimeout {
                            host,
                            max_wait_ms: max_wait.as_millis() as u64,
                        });
                    }
                    let jitter =
                        Duration::from_millis(rand::rng().random_range(0..=WAIT_JITTER_MS));
                    tokio::time::sleep(remaining + jitter).await;
                }
            }
        }
    }
}
