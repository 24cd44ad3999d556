//! Feed fetching boundary for feedloop.
//!
//! The scheduling engine consumes this module through the [`FeedFetcher`]
//! trait; [`HttpFeedFetcher`] is the production implementation.

pub mod fetcher;
pub mod types;

pub use fetcher::{parse_feed, validate_url, FeedFetcher, HttpFeedFetcher};
pub use types::{ParsedArticle, ParsedFeed, MAX_SUMMARY_LENGTH};
