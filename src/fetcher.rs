use crate::types::{PublisherError, RawFeedItem, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use chrono::Utc;
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "feed-publisher/0.1".to_string(),
            timeout_seconds: 10,
            max_retries: 2,
            retry_delay_seconds: 2,
        }
    }
}

/// Source of raw feed items. The ingestion pipeline only sees this trait;
/// production uses `HttpFeedSource`, tests a `StaticFeedSource`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn source_name(&self) -> String;

    async fn fetch(&self) -> Result<Vec<RawFeedItem>>;
}

/// Fetches and parses an RSS/Atom feed over HTTP, walking an ordered URL
/// list until one succeeds.
pub struct HttpFeedSource {
    client: Client,
    urls: Vec<String>,
    config: FetchConfig,
}

impl HttpFeedSource {
    pub fn new(urls: Vec<String>, config: FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, urls, config }
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<RawFeedItem>> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(url).await {
                Ok(items) => return Ok(items),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PublisherError::Parse("no fetch attempt made".into())))
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<RawFeedItem>> {
        debug!("Fetching feed: {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublisherError::Parse(format!(
                "HTTP {} fetching {}",
                status, url
            )));
        }

        let body = response.bytes().await?;
        let items = parse_feed(&body)?;
        info!("Fetched {} items from {}", items.len(), url);
        Ok(items)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn source_name(&self) -> String {
        self.urls.first().cloned().unwrap_or_else(|| "feed".to_string())
    }

    /// Tries the primary URL first, then each fallback in order; the first
    /// URL that fetches and parses wins.
    async fn fetch(&self) -> Result<Vec<RawFeedItem>> {
        let mut last_error = None;

        for url in &self.urls {
            match self.fetch_url(url).await {
                Ok(items) => return Ok(items),
                Err(e) => {
                    warn!("Feed URL {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PublisherError::Parse("no feed URL configured".into())))
    }
}

/// Parses RSS/Atom bytes into raw items.
pub fn parse_feed(content: &[u8]) -> Result<Vec<RawFeedItem>> {
    let feed = parser::parse(content)
        .map_err(|e| PublisherError::Parse(format!("failed to parse feed: {e}")))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let guid = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.clone())
            };
            let media_url = entry
                .media
                .first()
                .and_then(|m| m.content.first())
                .and_then(|c| c.url.as_ref())
                .map(|u| u.to_string());

            RawFeedItem {
                guid,
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                link: entry.links.first().map(|l| l.href.clone()),
                description: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
                published_at: entry.published.map(|dt| dt.with_timezone(&Utc)),
                tags: entry.categories.into_iter().map(|c| c.term).collect(),
                media_url,
            }
        })
        .collect();

    Ok(items)
}

/// Canned feed source for tests and local development.
pub struct StaticFeedSource {
    items: Vec<RawFeedItem>,
}

impl StaticFeedSource {
    pub fn new(items: Vec<RawFeedItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    fn source_name(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self) -> Result<Vec<RawFeedItem>> {
        Ok(self.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Engineering Blog</title>
    <item>
      <guid>tag:blog,2020:post-1</guid>
      <title>Introducing streams</title>
      <link>https://example.com/streams</link>
      <description>A new way to process data.</description>
      <pubDate>Mon, 06 Jan 2020 08:00:00 GMT</pubDate>
      <category>announcement</category>
    </item>
    <item>
      <title>Untagged item</title>
      <link>https://example.com/untagged</link>
      <description>No guid here.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items() {
        let items = parse_feed(RSS_SAMPLE.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.guid.as_deref(), Some("tag:blog,2020:post-1"));
        assert_eq!(first.title, "Introducing streams");
        assert_eq!(first.link.as_deref(), Some("https://example.com/streams"));
        assert_eq!(first.tags, vec!["announcement".to_string()]);
        assert!(first.published_at.is_some());
    }

    #[test]
    fn rejects_non_feed_content() {
        assert!(parse_feed(b"not a feed at all").is_err());
    }
}
