use crate::clock::Clock;
use crate::publisher::SocialPublisher;
use crate::store::Store;
use crate::types::{NewLogEntry, Result};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How close to expiry a credential may get before it is renewed.
pub const REFRESH_WINDOW_MINUTES: i64 = 30;

/// Proactively renews the platform credential. Sole writer of credential
/// rows; the publish loop only reads them, so no locking is needed between
/// the two timers.
pub struct CredentialRefresher {
    store: Arc<Store>,
    publisher: Arc<dyn SocialPublisher>,
    clock: Arc<dyn Clock>,
}

impl CredentialRefresher {
    pub fn new(
        store: Arc<Store>,
        publisher: Arc<dyn SocialPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// One refresh check. Returns whether a refresh was performed. Refresh
    /// failures are logged, never escalated.
    pub async fn run(&self) -> Result<bool> {
        let Some(credential) = self.store.latest_credential().await? else {
            debug!("No credential stored, nothing to refresh");
            return Ok(false);
        };

        let now = self.clock.now();
        if credential.expires_at - now > Duration::minutes(REFRESH_WINDOW_MINUTES) {
            debug!("Credential valid until {}, no refresh needed", credential.expires_at);
            return Ok(false);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            warn!("Credential expiring but no refresh token available; manual re-authorization required");
            return Ok(false);
        };

        info!("Credential expires at {}, refreshing", credential.expires_at);
        match self.publisher.refresh(&refresh_token).await {
            Ok(mut renewed) => {
                // Keep the old refresh token when the exchange omits one.
                if renewed.refresh_token.is_none() {
                    renewed.refresh_token = Some(refresh_token);
                }
                self.store.store_credential(&renewed).await?;
                info!("Credential refreshed, now valid until {}", renewed.expires_at);
                Ok(true)
            }
            Err(e) => {
                error!("Credential refresh failed: {}", e);
                self.store
                    .record_log(NewLogEntry::error(
                        None,
                        "credential refresh failed",
                        Some(e.to_string()),
                    ))
                    .await?;
                Ok(false)
            }
        }
    }
}
