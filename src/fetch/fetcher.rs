//! RSS/Atom feed fetcher with security measures.
//!
//! Fetches and parses feeds with SSRF protection and resource limits, and
//! classifies every failure as retryable (network-class) or not
//! (content-class), which drives the worker's retry policy.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::{Client, StatusCode};

use crate::config::FetchConfig;
use crate::fetch::types::{ParsedArticle, ParsedFeed, MAX_SUMMARY_LENGTH};
use crate::{FeedLoopError, Result};

/// User agent string for feed fetching.
const USER_AGENT: &str = "feedloop/0.1 (RSS refresh engine)";

/// Boundary contract for the fetch/parse collaborator.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch and parse the feed at `url`.
    ///
    /// Errors are classified: [`FeedLoopError::RetryableFetch`] for
    /// network-class failures, [`FeedLoopError::NonRetryableFetch`] for
    /// content-class failures.
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

/// HTTP feed fetcher backed by reqwest and feed-rs.
pub struct HttpFeedFetcher {
    client: Client,
    max_feed_size: u64,
}

impl HttpFeedFetcher {
    /// Create a new fetcher from the fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                FeedLoopError::Config(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        validate_url(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedLoopError::RetryableFetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(FeedLoopError::NonRetryableFetch(format!(
                    "feed too large: {content_length} bytes (max {} bytes)",
                    self.max_feed_size
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedLoopError::RetryableFetch(format!("failed to read response: {e}")))?;

        if bytes.len() as u64 > self.max_feed_size {
            return Err(FeedLoopError::NonRetryableFetch(format!(
                "feed too large: {} bytes (max {} bytes)",
                bytes.len(),
                self.max_feed_size
            )));
        }

        parse_feed(&bytes)
    }
}

/// Map a non-success HTTP status to the retry taxonomy.
///
/// 5xx and 429 are transient origin conditions; other 4xx are terminal.
fn classify_status(status: StatusCode) -> FeedLoopError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FeedLoopError::RetryableFetch(format!("HTTP {status}"))
    } else {
        FeedLoopError::NonRetryableFetch(format!("HTTP {status}"))
    }
}

/// Validate a URL for SSRF protection.
///
/// Checks that the URL uses http/https, and that the host is neither a
/// reserved hostname nor a private/loopback address. Failures are
/// non-retryable: a bad URL will not get better on retry.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| FeedLoopError::NonRetryableFetch(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedLoopError::NonRetryableFetch(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| FeedLoopError::NonRetryableFetch("URL has no host".to_string()))?;

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(FeedLoopError::NonRetryableFetch(format!(
                    "forbidden host: {domain}"
                )));
            }
        }
        url::Host::Ipv4(ipv4) => {
            if is_private_ip(&IpAddr::V4(ipv4)) {
                return Err(FeedLoopError::NonRetryableFetch(format!(
                    "private IP address not allowed: {ipv4}"
                )));
            }
        }
        url::Host::Ipv6(ipv6) => {
            if is_private_ip(&IpAddr::V6(ipv6)) {
                return Err(FeedLoopError::NonRetryableFetch(format!(
                    "private IP address not allowed: {ipv6}"
                )));
            }
        }
    }

    Ok(())
}

/// Check if a hostname is reserved for local infrastructure.
fn is_forbidden_hostname(host: &str) -> bool {
    let host = host.to_lowercase();
    if host == "localhost" {
        return true;
    }
    const FORBIDDEN_SUFFIXES: [&str; 7] = [
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];
    FORBIDDEN_SUFFIXES.iter().any(|s| host.ends_with(s))
}

/// Check if an IP address is private/reserved.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            // Documentation ranges: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
            let documentation = (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113);
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || documentation
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique local: fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Parse feed bytes into a [`ParsedFeed`].
///
/// Parse failures are non-retryable: malformed content stays malformed.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| FeedLoopError::NonRetryableFetch(format!("failed to parse feed: {e}")))?;

    let title = feed
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let description = feed.description.map(|d| strip_html(&d.content));
    let site_url = feed.links.first().map(|l| l.href.clone());

    let articles: Vec<ParsedArticle> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let summary = entry
                .summary
                .map(|t| t.content)
                .or(entry.content.and_then(|c| c.body))
                .map(|d| truncate_summary(&strip_html(&d)));
            ParsedArticle {
                guid: entry.id,
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                link: entry.links.first().map(|l| l.href.clone()),
                summary,
                author: entry.authors.first().map(|a| a.name.clone()),
                published_at: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(ParsedFeed {
        title,
        description,
        site_url,
        articles,
    })
}

/// Strip HTML tags and decode common entities.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_entity = false;
    let mut entity = String::new();

    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => {
                in_entity = true;
                entity.clear();
            }
            ';' if in_entity => {
                in_entity = false;
                match entity.as_str() {
                    "amp" => result.push('&'),
                    "lt" => result.push('<'),
                    "gt" => result.push('>'),
                    "quot" => result.push('"'),
                    "apos" => result.push('\''),
                    "nbsp" => result.push(' '),
                    _ if entity.starts_with('#') => {
                        if let Some(code) = parse_numeric_entity(&entity) {
                            if let Some(c) = char::from_u32(code) {
                                result.push(c);
                            }
                        }
                    }
                    _ => {
                        result.push('&');
                        result.push_str(&entity);
                        result.push(';');
                    }
                }
            }
            _ if in_entity => entity.push(ch),
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Parse a numeric HTML entity (e.g., "#123" or "#x7B").
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse().ok()
    } else {
        None
    }
}

/// Truncate a summary to the maximum stored length.
///
/// Cuts on a char boundary at or below the byte limit.
fn truncate_summary(text: &str) -> String {
    if text.len() <= MAX_SUMMARY_LENGTH {
        return text.to_string();
    }
    let mut end = MAX_SUMMARY_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
