use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry from an external content feed, keyed by its stable identity
/// (feed guid, falling back to link). Immutable after insert except for the
/// `processed` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: DateTime<Utc>,
    pub tags: Vec<String>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Data for a feed item that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewFeedItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "scheduled" => Some(PostStatus::Scheduled),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    /// `published` and `failed` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Failed)
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostOrigin {
    Manual,
    Feed,
}

impl PostOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostOrigin::Manual => "manual",
            PostOrigin::Feed => "feed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(PostOrigin::Manual),
            "feed" => Some(PostOrigin::Feed),
            _ => None,
        }
    }
}

/// Closed set of content categories. Classifier and formatter both match on
/// this exhaustively, so adding a category is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tutorial,
    CaseStudy,
    Announcement,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tutorial => "tutorial",
            Category::CaseStudy => "case_study",
            Category::Announcement => "announcement",
            Category::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tutorial" => Some(Category::Tutorial),
            "case_study" => Some(Category::CaseStudy),
            "announcement" => Some(Category::Announcement),
            "general" => Some(Category::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of content the system schedules and publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub category: Category,
    pub origin: PostOrigin,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub category: Category,
    pub origin: PostOrigin,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogStatus::Success),
            "error" => Some(LogStatus::Error),
            _ => None,
        }
    }
}

/// Append-only audit record of publish outcomes and background job errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishLogEntry {
    pub id: Uuid,
    pub post_id: Option<Uuid>,
    pub status: LogStatus,
    pub message: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub post_id: Option<Uuid>,
    pub status: LogStatus,
    pub message: String,
    pub error: Option<String>,
}

impl NewLogEntry {
    pub fn success(post_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            post_id,
            status: LogStatus::Success,
            message: message.into(),
            error: None,
        }
    }

    pub fn error(post_id: Option<Uuid>, message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            post_id,
            status: LogStatus::Error,
            message: message.into(),
            error,
        }
    }
}

/// Access/refresh token pair for the social platform. The store keeps
/// history; the most recent non-expired row is the current credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A feed entry as returned by the fetch transport, before any dedup or
/// normalization.
#[derive(Debug, Clone, Default)]
pub struct RawFeedItem {
    pub guid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub media_url: Option<String>,
}

/// Structured output of the text-generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub title: String,
    pub body: String,
}

/// Identity of the publishing account on the social platform.
#[derive(Debug, Clone)]
pub struct ProfileIdentity {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Counters reported by one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub new_items: usize,
    pub posts_created: usize,
    pub skipped_stale: usize,
    pub failed: usize,
}

/// Post counts by status plus feed-item totals, for the status surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub total_posts: i64,
    pub draft_posts: i64,
    pub scheduled_posts: i64,
    pub published_posts: i64,
    pub failed_posts: i64,
    pub total_items: i64,
    pub unprocessed_items: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("post not found: {0}")]
    PostNotFound(Uuid),

    #[error("no posting day configured")]
    NoPostingDayConfigured,

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("content generation failed: {0}")]
    Generation(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("authorization error: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PublisherError>;
