use crate::classifier::classify;
use crate::clock::Clock;
use crate::config::PostingConfig;
use crate::fetcher::FeedSource;
use crate::formatter;
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::slots::SlotAllocator;
use crate::store::Store;
use crate::types::{
    FeedItem, IngestReport, NewFeedItem, NewPost, PostOrigin, PublisherError, RawFeedItem, Result,
};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Items whose publication date is older than this never become posts; they
/// are stored and marked processed so they are not reconsidered.
pub const STALE_ITEM_AGE_DAYS: i64 = 60;

/// Consumes feed items and turns each unseen one into a scheduled post:
/// dedup, stale check, classification, generation, slot allocation. Running
/// the pipeline twice over the same feed is a no-op the second time.
pub struct IngestionPipeline {
    store: Arc<Store>,
    source: Arc<dyn FeedSource>,
    generator: Arc<dyn ContentGenerator>,
    posting: PostingConfig,
    clock: Arc<dyn Clock>,
}

/// A feed item normalized for post creation, either fresh from the fetcher
/// or re-read from the store for a generation retry.
struct PendingItem {
    guid: String,
    title: String,
    link: String,
    description: String,
    pub_date: DateTime<Utc>,
    tags: Vec<String>,
    image_url: Option<String>,
}

impl PendingItem {
    fn from_stored(item: &FeedItem) -> Self {
        Self {
            guid: item.guid.clone(),
            title: item.title.clone(),
            link: item.link.clone(),
            description: item.description.clone(),
            pub_date: item.pub_date,
            tags: item.tags.clone(),
            image_url: find_img_src(&item.description),
        }
    }
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<Store>,
        source: Arc<dyn FeedSource>,
        generator: Arc<dyn ContentGenerator>,
        posting: PostingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            generator,
            posting,
            clock,
        }
    }

    /// One ingestion run: fetch, process new items, then retry stored items
    /// that are still waiting on content generation. A single item's failure
    /// never aborts the batch; a missing posting-day configuration does.
    pub async fn run(&self) -> Result<IngestReport> {
        info!("Starting feed ingestion from {}", self.source.source_name());
        let raw_items = self.source.fetch().await?;

        let mut report = IngestReport {
            fetched: raw_items.len(),
            ..Default::default()
        };
        let mut allocator = SlotAllocator::new(&self.posting.days, self.posting.time);
        let mut attempted: HashSet<String> = HashSet::new();

        for raw in &raw_items {
            match self.process_raw_item(raw, &mut allocator, &mut report, &mut attempted).await {
                Ok(()) => {}
                Err(e @ PublisherError::NoPostingDayConfigured) => return Err(e),
                Err(e) => {
                    error!("Failed to process feed item '{}': {}", raw.title, e);
                    report.failed += 1;
                }
            }
        }

        // Items from earlier runs that never got generated content. Items
        // attempted above are skipped so one run does not retry them twice.
        let pending = self.store.unprocessed_items().await?;
        for item in pending {
            if attempted.contains(&item.guid) {
                continue;
            }
            let pending_item = PendingItem::from_stored(&item);
            match self.attempt_post(&pending_item, &mut allocator, &mut report).await {
                Ok(()) => {}
                Err(e @ PublisherError::NoPostingDayConfigured) => return Err(e),
                Err(e) => {
                    error!("Failed to retry feed item '{}': {}", item.guid, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Ingestion finished: {} fetched, {} new, {} posts created, {} stale, {} failed",
            report.fetched, report.new_items, report.posts_created, report.skipped_stale, report.failed
        );
        Ok(report)
    }

    async fn process_raw_item(
        &self,
        raw: &RawFeedItem,
        allocator: &mut SlotAllocator,
        report: &mut IngestReport,
        attempted: &mut HashSet<String>,
    ) -> Result<()> {
        let key = raw
            .guid
            .clone()
            .filter(|g| !g.is_empty())
            .or_else(|| raw.link.clone().filter(|l| !l.is_empty()));
        let Some(key) = key else {
            warn!("Skipping feed item without guid or link: {}", raw.title);
            return Ok(());
        };

        if self.store.has_seen(&key).await? {
            return Ok(());
        }

        let item = NewFeedItem {
            guid: key.clone(),
            title: raw.title.clone(),
            link: raw.link.clone().unwrap_or_default(),
            description: raw
                .description
                .clone()
                .or_else(|| raw.content.clone())
                .unwrap_or_default(),
            pub_date: raw.published_at.unwrap_or_else(|| self.clock.now()),
            tags: raw.tags.clone(),
        };
        self.store.record_item(&item).await?;
        report.new_items += 1;
        debug!("Stored new feed item: {}", item.title);

        let pending = PendingItem {
            guid: item.guid,
            title: item.title,
            link: item.link,
            description: item.description,
            pub_date: item.pub_date,
            tags: item.tags,
            image_url: extract_image_url(raw),
        };
        attempted.insert(pending.guid.clone());
        self.attempt_post(&pending, allocator, report).await
    }

    /// Classify, generate, allocate, persist. Generation is required for
    /// feed-derived posts: on failure the item stays unprocessed so the next
    /// run retries it, and no post is created.
    async fn attempt_post(
        &self,
        item: &PendingItem,
        allocator: &mut SlotAllocator,
        report: &mut IngestReport,
    ) -> Result<()> {
        let now = self.clock.now();

        if item.pub_date < now - Duration::days(STALE_ITEM_AGE_DAYS) {
            debug!("Feed item {} is older than {} days, skipping", item.guid, STALE_ITEM_AGE_DAYS);
            self.store.mark_processed(&item.guid).await?;
            report.skipped_stale += 1;
            return Ok(());
        }

        let category = classify(&item.title, &item.description, &item.tags);
        let cleaned = formatter::clean_description(&item.description);

        let request = GenerationRequest {
            title: &item.title,
            description: &cleaned,
            link: &item.link,
            category,
        };
        let generated = match self.generator.generate(&request).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(
                    "Content generation failed for '{}', will retry next run: {}",
                    item.title, e
                );
                report.failed += 1;
                return Ok(());
            }
        };

        let body = match formatter::format_generated(
            &generated,
            &item.link,
            self.posting.max_post_length,
        ) {
            Ok(body) => body,
            Err(e) => {
                warn!("Generated content unusable for '{}': {}", item.title, e);
                report.failed += 1;
                return Ok(());
            }
        };

        let slot = allocator.next_slot(now)?;
        let post = self
            .store
            .create_post(NewPost {
                title: generated.title,
                body,
                source_url: (!item.link.is_empty()).then(|| item.link.clone()),
                image_url: item.image_url.clone(),
                category,
                origin: PostOrigin::Feed,
                scheduled_at: Some(slot),
            })
            .await?;
        self.store.mark_processed(&item.guid).await?;
        report.posts_created += 1;

        info!("Scheduled post '{}' for {}", post.title, slot);
        Ok(())
    }
}

fn img_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img[^>]+src="([^"]+)""#).unwrap())
}

/// First image reference of a raw item: structured media if present,
/// otherwise the first `<img src>` in the content.
fn extract_image_url(raw: &RawFeedItem) -> Option<String> {
    if let Some(url) = &raw.media_url {
        return Some(url.clone());
    }
    raw.content
        .as_deref()
        .or(raw.description.as_deref())
        .and_then(find_img_src)
}

fn find_img_src(html: &str) -> Option<String> {
    img_src_re()
        .captures(html)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_structured_media() {
        let raw = RawFeedItem {
            media_url: Some("https://example.com/media.png".into()),
            content: Some(r#"<img src="https://example.com/inline.png">"#.into()),
            ..Default::default()
        };
        assert_eq!(
            extract_image_url(&raw).as_deref(),
            Some("https://example.com/media.png")
        );
    }

    #[test]
    fn scans_content_for_img_tag() {
        let raw = RawFeedItem {
            content: Some(r#"<p>text</p><IMG class="x" src="https://example.com/a.jpg">"#.into()),
            ..Default::default()
        };
        assert_eq!(
            extract_image_url(&raw).as_deref(),
            Some("https://example.com/a.jpg")
        );
    }

    #[test]
    fn no_image_yields_none() {
        let raw = RawFeedItem {
            content: Some("<p>plain</p>".into()),
            ..Default::default()
        };
        assert_eq!(extract_image_url(&raw), None);
    }
}
