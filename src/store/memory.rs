//! In-memory feed store for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{truncate_error, Feed, FeedStore, FetchStatus, NewArticle, NewFeed};
use crate::Result;

/// In-memory implementation of [`FeedStore`].
///
/// Mirrors the SQLite store's semantics: articles are deduplicated by
/// (owner, url) and status updates always advance `last_fetched_at`.
#[derive(Default)]
pub struct MemoryFeedStore {
    feeds: Mutex<HashMap<i64, Feed>>,
    articles: Mutex<HashSet<(i64, String)>>,
    next_id: AtomicI64,
}

impl MemoryFeedStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
            articles: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Create a new feed.
    pub fn add_feed(&self, new_feed: &NewFeed) -> Feed {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let feed = Feed {
            id,
            owner_id: new_feed.owner_id,
            url: new_feed.url.clone(),
            title: new_feed.title.clone(),
            refresh_interval_minutes: new_feed.refresh_interval_minutes,
            last_fetched_at: None,
            last_fetch_status: None,
            last_fetch_error: None,
            created_at: now,
            updated_at: now,
        };
        self.feeds.lock().unwrap().insert(id, feed.clone());
        feed
    }

    /// Delete a feed.
    pub fn remove_feed(&self, feed_id: i64) -> bool {
        self.feeds.lock().unwrap().remove(&feed_id).is_some()
    }

    /// Overwrite a feed's last-fetched timestamp (test setup helper).
    pub fn set_last_fetched_at(&self, feed_id: i64, at: Option<DateTime<Utc>>) {
        if let Some(feed) = self.feeds.lock().unwrap().get_mut(&feed_id) {
            feed.last_fetched_at = at;
        }
    }

    /// Number of stored articles.
    pub fn article_count(&self) -> usize {
        self.articles.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        Ok(self.feeds.lock().unwrap().get(&feed_id).cloned())
    }

    async fn list_feeds(&self, owner_id: Option<i64>) -> Result<Vec<Feed>> {
        let feeds = self.feeds.lock().unwrap();
        let mut result: Vec<Feed> = feeds
            .values()
            .filter(|f| owner_id.map_or(true, |o| f.owner_id == o))
            .cloned()
            .collect();
        result.sort_by_key(|f| f.id);
        Ok(result)
    }

    async fn upsert_articles(
        &self,
        _feed_id: i64,
        owner_id: i64,
        articles: &[NewArticle],
    ) -> Result<usize> {
        let mut stored = self.articles.lock().unwrap();
        let mut inserted = 0;
        for article in articles {
            if stored.insert((owner_id, article.url.clone())) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn update_feed_status(
        &self,
        feed_id: i64,
        owner_id: i64,
        status: FetchStatus,
        fetched_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut feeds = self.feeds.lock().unwrap();
        if let Some(feed) = feeds.get_mut(&feed_id) {
            if feed.owner_id == owner_id {
                feed.last_fetched_at = Some(fetched_at);
                feed.last_fetch_status = Some(status);
                feed.last_fetch_error = error.map(truncate_error);
                feed.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str) -> NewArticle {
        NewArticle {
            url: url.to_string(),
            title: "A".to_string(),
            summary: None,
            author: None,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = MemoryFeedStore::new();
        let feed = store.add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));
        let fetched = store.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(fetched.url, "https://example.com/feed");
    }

    #[tokio::test]
    async fn test_upsert_dedup() {
        let store = MemoryFeedStore::new();
        let feed = store.add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));

        let articles = vec![article("https://example.com/1")];
        assert_eq!(store.upsert_articles(feed.id, 1, &articles).await.unwrap(), 1);
        assert_eq!(store.upsert_articles(feed.id, 1, &articles).await.unwrap(), 0);
        // Different owner, same url: not deduplicated
        assert_eq!(store.upsert_articles(feed.id, 2, &articles).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_update_advances_last_fetched() {
        let store = MemoryFeedStore::new();
        let feed = store.add_feed(&NewFeed::new(1, "https://example.com/feed", "F"));

        let now = Utc::now();
        store
            .update_feed_status(feed.id, 1, FetchStatus::Failed, now, Some("err"))
            .await
            .unwrap();

        let feed = store.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetched_at, Some(now));
        assert_eq!(feed.last_fetch_status, Some(FetchStatus::Failed));
        assert_eq!(feed.last_fetch_error, Some("err".to_string()));
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let store = MemoryFeedStore::new();
        store.add_feed(&NewFeed::new(1, "https://a.example.com", "A"));
        store.add_feed(&NewFeed::new(2, "https://b.example.com", "B"));

        assert_eq!(store.list_feeds(Some(1)).await.unwrap().len(), 1);
        assert_eq!(store.list_feeds(None).await.unwrap().len(), 2);
    }
}
