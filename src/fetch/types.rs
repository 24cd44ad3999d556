//! Parsed feed types returned by the fetch collaborator.

use chrono::{DateTime, Utc};

/// Maximum length for an article summary, in characters.
pub const MAX_SUMMARY_LENGTH: usize = 10_000;

/// A feed as parsed from an external source.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Feed title.
    pub title: String,
    /// Feed description.
    pub description: Option<String>,
    /// Site URL (the website the feed belongs to).
    pub site_url: Option<String>,
    /// Parsed articles.
    pub articles: Vec<ParsedArticle>,
}

/// An article as parsed from an external source.
#[derive(Debug, Clone)]
pub struct ParsedArticle {
    /// Unique identifier (RSS guid or Atom id).
    pub guid: String,
    /// Article title.
    pub title: String,
    /// Link to the original article.
    pub link: Option<String>,
    /// Article summary (HTML tags stripped, truncated).
    pub summary: Option<String>,
    /// Author name.
    pub author: Option<String>,
    /// When the article was published.
    pub published_at: Option<DateTime<Utc>>,
}

impl ParsedArticle {
    /// The deduplication URL for this article: the link when present,
    /// otherwise the guid.
    pub fn dedup_url(&self) -> &str {
        self.link.as_deref().unwrap_or(&self.guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_url_prefers_link() {
        let article = ParsedArticle {
            guid: "guid-1".to_string(),
            title: "Title".to_string(),
            link: Some("https://example.com/a/1".to_string()),
            summary: None,
            author: None,
            published_at: None,
        };
        assert_eq!(article.dedup_url(), "https://example.com/a/1");
    }

    #[test]
    fn test_dedup_url_falls_back_to_guid() {
        let article = ParsedArticle {
            guid: "urn:uuid:1".to_string(),
            title: "Title".to_string(),
            link: None,
            summary: None,
            author: None,
            published_at: None,
        };
        assert_eq!(article.dedup_url(), "urn:uuid:1");
    }
}
