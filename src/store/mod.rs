//! Persistence boundary for feedloop.
//!
//! The scheduling engine consumes this module through the [`FeedStore`]
//! trait. [`SqliteFeedStore`] is the production implementation;
//! [`MemoryFeedStore`] backs tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

pub use memory::MemoryFeedStore;
pub use sqlite::SqliteFeedStore;

/// Maximum stored length for a fetch error message, in bytes.
pub const MAX_ERROR_LENGTH: usize = 512;

/// Outcome of the most recent fetch of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed.
    Failed,
}

impl FetchStatus {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FetchStatus::Success),
            "failed" => Some(FetchStatus::Failed),
            _ => None,
        }
    }
}

/// A subscribed feed.
#[derive(Debug, Clone)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// User who owns the feed.
    pub owner_id: i64,
    /// Feed URL.
    pub url: String,
    /// Feed title.
    pub title: String,
    /// Refresh interval in minutes.
    pub refresh_interval_minutes: u32,
    /// Last time a fetch was attempted (success or failure).
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Outcome of the last fetch.
    pub last_fetch_status: Option<FetchStatus>,
    /// Error message of the last failed fetch.
    pub last_fetch_error: Option<String>,
    /// When the feed was created.
    pub created_at: DateTime<Utc>,
    /// When the feed was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A new feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// User who owns the feed.
    pub owner_id: i64,
    /// Feed URL.
    pub url: String,
    /// Feed title.
    pub title: String,
    /// Refresh interval in minutes.
    pub refresh_interval_minutes: u32,
}

impl NewFeed {
    /// Create a new feed.
    pub fn new(owner_id: i64, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            owner_id,
            url: url.into(),
            title: title.into(),
            refresh_interval_minutes: 60,
        }
    }

    /// Set the refresh interval.
    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.refresh_interval_minutes = minutes;
        self
    }
}

/// A new article for storage.
#[derive(Debug, Clone)]
pub struct NewArticle {
    /// Deduplication URL (article link, or guid when the entry has no link).
    pub url: String,
    /// Article title.
    pub title: String,
    /// Article summary.
    pub summary: Option<String>,
    /// Author name.
    pub author: Option<String>,
    /// When the article was published.
    pub published_at: Option<DateTime<Utc>>,
}

/// Truncate a fetch error message to the bounded stored length.
///
/// Cuts on a char boundary at or below the byte limit, so multibyte
/// messages never exceed it.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LENGTH {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LENGTH;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Boundary contract for the persistence collaborator.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Get a feed by ID.
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;

    /// List feeds, optionally restricted to one owner.
    async fn list_feeds(&self, owner_id: Option<i64>) -> Result<Vec<Feed>>;

    /// Store articles for a feed, deduplicated by (owner, url).
    ///
    /// Idempotent: re-storing already-seen articles is a no-op. Returns the
    /// number of newly inserted articles.
    async fn upsert_articles(
        &self,
        feed_id: i64,
        owner_id: i64,
        articles: &[NewArticle],
    ) -> Result<usize>;

    /// Record the outcome of a fetch attempt.
    ///
    /// Always advances `last_fetched_at`, clears the stored error on
    /// success and replaces it (truncated) on failure.
    async fn update_feed_status(
        &self,
        feed_id: i64,
        owner_id: i64,
        status: FetchStatus,
        fetched_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()>;
}
