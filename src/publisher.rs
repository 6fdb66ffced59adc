use crate::config::SocialConfig;
use crate::types::{Credential, ProfileIdentity, PublisherError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

const API_BASE: &str = "https://api.linkedin.com/v2";
const OAUTH_BASE: &str = "https://www.linkedin.com/oauth/v2";
const OAUTH_SCOPE: &str = "r_liteprofile w_member_social";

/// The social platform the scheduler publishes through. All calls are
/// network I/O; credentials are passed per call so the refresher can rotate
/// them underneath.
#[async_trait]
pub trait SocialPublisher: Send + Sync {
    fn publisher_name(&self) -> String;

    async fn get_profile(&self, access_token: &str) -> Result<ProfileIdentity>;

    /// Publishes `text` as the given author and returns the platform's post id.
    async fn publish(
        &self,
        access_token: &str,
        author: &ProfileIdentity,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<Credential>;

    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;
}

pub struct LinkedInClient {
    client: Client,
    config: SocialConfig,
}

#[derive(Deserialize)]
struct ProfileResponse {
    id: String,
    #[serde(rename = "localizedFirstName")]
    first_name: Option<String>,
    #[serde(rename = "localizedLastName")]
    last_name: Option<String>,
}

#[derive(Deserialize)]
struct PostResponse {
    id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl LinkedInClient {
    pub fn new(config: SocialConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Browser URL for the one-time authorization handshake.
    pub fn authorization_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            &format!("{OAUTH_BASE}/authorization"),
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", OAUTH_SCOPE),
            ],
        )?;
        Ok(url.to_string())
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<Credential> {
        let response = self
            .client
            .post(format!("{OAUTH_BASE}/accessToken"))
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PublisherError::Auth(format!(
                "token endpoint returned HTTP {status}: {detail}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
            scope: token.scope,
            created_at: Utc::now(),
        })
    }

    /// Registers and uploads a remote image, returning the media URN to
    /// attach to a post.
    async fn upload_image(
        &self,
        access_token: &str,
        image_url: &str,
        author_urn: &str,
    ) -> Result<String> {
        debug!("Uploading image {}", image_url);

        let register = self
            .client
            .post(format!("{API_BASE}/assets?action=registerUpload"))
            .bearer_auth(access_token)
            .json(&json!({
                "registerUploadRequest": {
                    "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                    "owner": author_urn,
                    "serviceRelationships": [{
                        "relationshipType": "OWNER",
                        "identifier": "urn:li:userGeneratedContent"
                    }]
                }
            }))
            .send()
            .await?
            .error_for_status()?;

        let register: serde_json::Value = register.json().await?;
        let upload_url = register["value"]["uploadMechanism"]
            ["com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest"]["uploadUrl"]
            .as_str()
            .ok_or_else(|| PublisherError::Publish("missing upload URL".into()))?
            .to_string();
        let asset = register["value"]["asset"]
            .as_str()
            .ok_or_else(|| PublisherError::Publish("missing asset URN".into()))?
            .to_string();

        let image = self
            .client
            .get(image_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        self.client
            .post(upload_url)
            .bearer_auth(access_token)
            .header("Content-Type", "application/octet-stream")
            .body(image)
            .send()
            .await?
            .error_for_status()?;

        Ok(asset)
    }
}

#[async_trait]
impl SocialPublisher for LinkedInClient {
    fn publisher_name(&self) -> String {
        "linkedin".to_string()
    }

    async fn get_profile(&self, access_token: &str) -> Result<ProfileIdentity> {
        if access_token.trim().is_empty() {
            return Err(PublisherError::Auth("access token is empty".into()));
        }

        let response = self
            .client
            .get(format!("{API_BASE}/me"))
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublisherError::Auth(format!(
                "profile request returned HTTP {status}"
            )));
        }

        let profile: ProfileResponse = response.json().await?;
        Ok(ProfileIdentity {
            id: profile.id,
            first_name: profile.first_name,
            last_name: profile.last_name,
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        author: &ProfileIdentity,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<String> {
        let author_urn = format!("urn:li:person:{}", author.id);

        let mut share = json!({
            "author": author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        if let Some(image_url) = image_url {
            match self.upload_image(access_token, image_url, &author_urn).await {
                Ok(asset) => {
                    let content = &mut share["specificContent"]["com.linkedin.ugc.ShareContent"];
                    content["shareMediaCategory"] = json!("IMAGE");
                    content["media"] = json!([{
                        "status": "READY",
                        "media": asset
                    }]);
                }
                Err(e) => {
                    warn!("Image upload failed, posting without it: {}", e);
                }
            }
        }

        let response = self
            .client
            .post(format!("{API_BASE}/ugcPosts"))
            .bearer_auth(access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&share)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PublisherError::Publish(format!(
                "publish returned HTTP {status}: {detail}"
            )));
        }

        let post: PostResponse = response.json().await?;
        info!("Published post {}", post.id);
        Ok(post.id)
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", &self.config.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ])
        .await
    }
}

/// In-memory publisher for tests: records published texts, can be scripted
/// to fail the first N publish calls, and counts refresh exchanges.
pub struct MockPublisher {
    fail_publishes: AtomicUsize,
    published: Mutex<Vec<String>>,
    refresh_calls: AtomicUsize,
    refreshed_with: Mutex<Option<String>>,
    refresh_token_in_response: Option<String>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            fail_publishes: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            refreshed_with: Mutex::new(None),
            refresh_token_in_response: None,
        }
    }

    /// Fails the first `n` publish calls, then succeeds.
    pub fn failing_publishes(n: usize) -> Self {
        let mut publisher = Self::new();
        publisher.fail_publishes = AtomicUsize::new(n);
        publisher
    }

    /// Makes refresh responses carry their own refresh token instead of
    /// omitting one.
    pub fn with_rotating_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token_in_response = Some(token.into());
        self
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.refreshed_with.lock().unwrap().clone()
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocialPublisher for MockPublisher {
    fn publisher_name(&self) -> String {
        "mock".to_string()
    }

    async fn get_profile(&self, access_token: &str) -> Result<ProfileIdentity> {
        if access_token.trim().is_empty() {
            return Err(PublisherError::Auth("access token is empty".into()));
        }
        Ok(ProfileIdentity {
            id: "mock-profile".to_string(),
            first_name: Some("Test".to_string()),
            last_name: Some("Account".to_string()),
        })
    }

    async fn publish(
        &self,
        _access_token: &str,
        _author: &ProfileIdentity,
        text: &str,
        _image_url: Option<&str>,
    ) -> Result<String> {
        let remaining = self.fail_publishes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_publishes.fetch_sub(1, Ordering::SeqCst);
            return Err(PublisherError::Publish("mock publish failure".into()));
        }

        let mut published = self.published.lock().unwrap();
        published.push(text.to_string());
        Ok(format!("urn:li:share:{}", published.len()))
    }

    async fn exchange_code(&self, _code: &str) -> Result<Credential> {
        Ok(Credential {
            access_token: "exchanged-token".to_string(),
            refresh_token: Some("initial-refresh-token".to_string()),
            expires_at: Utc::now() + Duration::days(60),
            scope: Some(OAUTH_SCOPE.to_string()),
            created_at: Utc::now(),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.refreshed_with.lock().unwrap() = Some(refresh_token.to_string());
        Ok(Credential {
            access_token: "refreshed-token".to_string(),
            refresh_token: self.refresh_token_in_response.clone(),
            expires_at: Utc::now() + Duration::days(60),
            scope: None,
            created_at: Utc::now(),
        })
    }
}
