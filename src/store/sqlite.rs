//! SQLite-backed feed store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{Feed, FeedStore, FetchStatus, NewArticle, NewFeed};
use crate::{FeedLoopError, Result};

/// Schema applied on open. `INSERT OR IGNORE` against the articles unique
/// index is what makes repeated fetches idempotent.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    refresh_interval_minutes INTEGER NOT NULL DEFAULT 60,
    last_fetched_at TEXT,
    last_fetch_status TEXT,
    last_fetch_error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (owner_id, url)
);

CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    owner_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT,
    author TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (owner_id, url)
);

CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_feeds_owner ON feeds(owner_id);
"#;

/// Row type for a feed from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    owner_id: i64,
    url: String,
    title: String,
    refresh_interval_minutes: i64,
    last_fetched_at: Option<String>,
    last_fetch_status: Option<String>,
    last_fetch_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            owner_id: row.owner_id,
            url: row.url,
            title: row.title,
            refresh_interval_minutes: row.refresh_interval_minutes.clamp(0, u32::MAX as i64) as u32,
            last_fetched_at: row.last_fetched_at.and_then(|s| parse_datetime(&s)),
            last_fetch_status: row.last_fetch_status.as_deref().and_then(FetchStatus::parse),
            last_fetch_error: row.last_fetch_error,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// SQLite feed store backed by a sqlx connection pool.
pub struct SqliteFeedStore {
    pool: SqlitePool,
}

impl SqliteFeedStore {
    /// Open a store at the given path, creating the file and schema if
    /// needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening feed store at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store for testing.
    ///
    /// Single connection: each SQLite in-memory connection is its own
    /// database.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory feed store");
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| FeedLoopError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a new feed.
    pub async fn add_feed(&self, new_feed: &NewFeed) -> Result<Feed> {
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (owner_id, url, title, refresh_interval_minutes)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(new_feed.owner_id)
        .bind(&new_feed.url)
        .bind(&new_feed.title)
        .bind(new_feed.refresh_interval_minutes as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| FeedLoopError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        self.get_feed(id)
            .await?
            .ok_or_else(|| FeedLoopError::NotFound("feed".to_string()))
    }

    /// Delete a feed and its articles.
    pub async fn remove_feed(&self, feed_id: i64, owner_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = $1 AND owner_id = $2")
            .bind(feed_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| FeedLoopError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl FeedStore for SqliteFeedStore {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT id, owner_id, url, title, refresh_interval_minutes,
                   last_fetched_at, last_fetch_status, last_fetch_error,
                   created_at, updated_at
            FROM feeds
            WHERE id = $1
            "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FeedLoopError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    async fn list_feeds(&self, owner_id: Option<i64>) -> Result<Vec<Feed>> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query_as::<_, FeedRow>(
                    r#"
                    SELECT id, owner_id, url, title, refresh_interval_minutes,
                           last_fetched_at, last_fetch_status, last_fetch_error,
                           created_at, updated_at
                    FROM feeds
                    WHERE owner_id = $1
                    ORDER BY id
                    "#,
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, FeedRow>(
                    r#"
                    SELECT id, owner_id, url, title, refresh_interval_minutes,
                           last_fetched_at, last_fetch_status, last_fetch_error,
                           created_at, updated_at
                    FROM feeds
                    ORDER BY id
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| FeedLoopError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    async fn upsert_articles(
        &self,
        feed_id: i64,
        owner_id: i64,
        articles: &[NewArticle],
    ) -> Result<usize> {
        let mut inserted = 0;
        for article in articles {
            let published_at = article.published_at.map(|dt| dt.to_rfc3339());
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO articles
                    (feed_id, owner_id, url, title, summary, author, published_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(feed_id)
            .bind(owner_id)
            .bind(&article.url)
            .bind(&article.title)
            .bind(&article.summary)
            .bind(&article.author)
            .bind(&published_at)
            .execute(&self.pool)
            .await
            .map_err(|e| FeedLoopError::Database(e.to_string()))?;

            if result.rows_affected() > 0 {
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
        let error = error.map(super::truncate_error);
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = $1,
                last_fetch_status = $2,
                last_fetch_error = $3,
                updated_at = datetime('now')
            WHERE id = $4 AND owner_id = $5
            "#,
        )
        .bind(fetched_at.to_rfc3339())
        .bind(status.as_str())
        .bind(&error)
        .bind(feed_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| FeedLoopError::Database(e.to_string()))?;

        Ok(())
    }
}

/// Parse a datetime string to DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // RFC3339 first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}
