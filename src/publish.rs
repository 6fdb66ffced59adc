use crate::clock::Clock;
use crate::publisher::SocialPublisher;
use crate::store::Store;
use crate::types::{NewLogEntry, Post, PostStatus, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between posts in one run, to stay friendly with the platform's
/// rate limits.
pub const INTER_POST_DELAY: Duration = Duration::from_secs(2);

/// Publishes due scheduled posts. Delivery is at-least-once: a post that
/// cannot be attempted (no valid credential) stays `scheduled` and is
/// retried next run, while a post whose publish call fails goes to the
/// terminal `failed` state.
pub struct PublishLoop {
    store: Arc<Store>,
    publisher: Arc<dyn SocialPublisher>,
    clock: Arc<dyn Clock>,
    include_images: bool,
    delay: Duration,
}

impl PublishLoop {
    pub fn new(
        store: Arc<Store>,
        publisher: Arc<dyn SocialPublisher>,
        clock: Arc<dyn Clock>,
        include_images: bool,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            include_images,
            delay: INTER_POST_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// One publish run. Returns the number of posts published. A single
    /// post's failure never stops the remaining due posts.
    pub async fn run(&self) -> Result<usize> {
        let due = self.store.due_scheduled_posts(self.clock.now()).await?;
        if due.is_empty() {
            debug!("No posts due for publishing");
            return Ok(0);
        }

        info!("Found {} posts due for publishing", due.len());
        let total = due.len();
        let mut published = 0;

        for (index, post) in due.iter().enumerate() {
            match self.publish_one(post).await {
                Ok(true) => published += 1,
                Ok(false) => {}
                Err(e) => error!("Error handling post {}: {}", post.id, e),
            }

            if total > 1 && index + 1 < total {
                tokio::time::sleep(self.delay).await;
            }
        }

        info!("Publish run finished: {}/{} published", published, total);
        Ok(published)
    }

    async fn publish_one(&self, post: &Post) -> Result<bool> {
        // Re-query the credential for every post; the refresher may have
        // rotated it mid-run.
        let Some(credential) = self.store.current_credential(self.clock.now()).await? else {
            warn!("No valid credential, skipping post {}", post.id);
            self.store
                .record_log(NewLogEntry::error(
                    Some(post.id),
                    "no valid credential available",
                    None,
                ))
                .await?;
            return Ok(false);
        };

        // Live check against the platform, not a cached verdict.
        let author = match self.publisher.get_profile(&credential.access_token).await {
            Ok(author) => author,
            Err(e) => {
                warn!("Credential rejected by platform, skipping post {}: {}", post.id, e);
                self.store
                    .record_log(NewLogEntry::error(
                        Some(post.id),
                        "credential validation failed",
                        Some(e.to_string()),
                    ))
                    .await?;
                return Ok(false);
            }
        };

        let image = if self.include_images {
            post.image_url.as_deref()
        } else {
            None
        };

        match self
            .publisher
            .publish(&credential.access_token, &author, &post.body, image)
            .await
        {
            Ok(external_id) => {
                let published_at = self.clock.now();
                self.store
                    .update_post_status(
                        post.id,
                        PostStatus::Published,
                        Some(&external_id),
                        Some(published_at),
                    )
                    .await?;
                self.store
                    .record_log(NewLogEntry::success(
                        Some(post.id),
                        format!("published as {external_id}"),
                    ))
                    .await?;
                info!("Published post '{}' as {}", post.title, external_id);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to publish post '{}': {}", post.title, e);
                self.store
                    .update_post_status(post.id, PostStatus::Failed, None, None)
                    .await?;
                self.store
                    .record_log(NewLogEntry::error(
                        Some(post.id),
                        "publish failed",
                        Some(e.to_string()),
                    ))
                    .await?;
                Ok(false)
            }
        }
    }
}
