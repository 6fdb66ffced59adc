use crate::types::{
    Credential, FeedItem, LogStatus, NewFeedItem, NewLogEntry, NewPost, Post, PostOrigin,
    PostStatus, PublishLogEntry, PublisherError, Result, StoreStats,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Persistent record of seen feed items, posts, publish logs, and
/// credentials. All callers go through this type; nothing else touches the
/// database.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("Connected to database");
        Ok(store)
    }

    /// One-connection in-memory database, used by tests. A pool with more
    /// than one connection would hand each connection its own empty
    /// `:memory:` database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_items (
                guid TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                description TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                source_url TEXT,
                image_url TEXT,
                category TEXT NOT NULL,
                origin TEXT NOT NULL,
                status TEXT NOT NULL,
                scheduled_at TEXT,
                published_at TEXT,
                external_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publish_logs (
                id TEXT PRIMARY KEY,
                post_id TEXT REFERENCES posts (id),
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT NOT NULL,
                scope TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_status_scheduled ON posts (status, scheduled_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_items_processed ON feed_items (processed)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_publish_logs_created ON publish_logs (created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Feed items

    pub async fn has_seen(&self, guid: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM feed_items WHERE guid = ?")
            .bind(guid)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Inserts a feed item. Not an upsert: callers are expected to check
    /// `has_seen` first, and inserting an existing key is an error.
    pub async fn record_item(&self, item: &NewFeedItem) -> Result<()> {
        if self.has_seen(&item.guid).await? {
            return Err(PublisherError::DuplicateKey(item.guid.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO feed_items (guid, title, link, description, pub_date, tags, processed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&item.guid)
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.description)
        .bind(item.pub_date)
        .bind(serde_json::to_string(&item.tags)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Stored feed item {}", item.guid);
        Ok(())
    }

    pub async fn mark_processed(&self, guid: &str) -> Result<()> {
        sqlx::query("UPDATE feed_items SET processed = 1 WHERE guid = ?")
            .bind(guid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Items that have not produced a post yet, newest first. Feeds the
    /// generation-retry pass of the ingestion pipeline.
    pub async fn unprocessed_items(&self) -> Result<Vec<FeedItem>> {
        let rows = sqlx::query("SELECT * FROM feed_items WHERE processed = 0 ORDER BY pub_date DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_feed_item).collect()
    }

    pub async fn get_item(&self, guid: &str) -> Result<Option<FeedItem>> {
        let row = sqlx::query("SELECT * FROM feed_items WHERE guid = ?")
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_feed_item).transpose()
    }

    // Posts

    /// Creates a post. Status defaults to `draft`; supplying a scheduled
    /// timestamp creates it directly in `scheduled`.
    pub async fn create_post(&self, data: NewPost) -> Result<Post> {
        let status = if data.scheduled_at.is_some() {
            PostStatus::Scheduled
        } else {
            PostStatus::Draft
        };
        let post = Post {
            id: Uuid::new_v4(),
            title: data.title,
            body: data.body,
            source_url: data.source_url,
            image_url: data.image_url,
            category: data.category,
            origin: data.origin,
            status,
            scheduled_at: data.scheduled_at,
            published_at: None,
            external_id: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO posts (id, title, body, source_url, image_url, category, origin, status,
                               scheduled_at, published_at, external_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)
            "#,
        )
        .bind(post.id.to_string())
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.source_url)
        .bind(&post.image_url)
        .bind(post.category.as_str())
        .bind(post.origin.as_str())
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Created {} post {}", post.status, post.id);
        Ok(post)
    }

    pub async fn get_post(&self, id: Uuid) -> Result<Post> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => map_post(&row),
            None => Err(PublisherError::PostNotFound(id)),
        }
    }

    pub async fn update_post_status(
        &self,
        id: Uuid,
        status: PostStatus,
        external_id: Option<&str>,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?,
                external_id = COALESCE(?, external_id),
                published_at = COALESCE(?, published_at)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(external_id)
        .bind(published_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::PostNotFound(id));
        }
        Ok(())
    }

    /// Moves a post's slot, flipping it to `scheduled`. Terminal posts are
    /// not reschedulable.
    pub async fn set_post_schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<Post> {
        let post = self.get_post(id).await?;
        if post.status.is_terminal() {
            return Err(PublisherError::InvalidTransition(format!(
                "post {} is {}",
                id, post.status
            )));
        }

        sqlx::query("UPDATE posts SET scheduled_at = ?, status = ? WHERE id = ?")
            .bind(at)
            .bind(PostStatus::Scheduled.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        self.get_post(id).await
    }

    /// Scheduled posts whose slot has passed, oldest slot first.
    pub async fn due_scheduled_posts(&self, now: DateTime<Utc>) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE status = ? AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(PostStatus::Scheduled.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_post).collect()
    }

    pub async fn recent_posts(&self, limit: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query("SELECT * FROM posts ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_post).collect()
    }

    // Publish logs

    pub async fn record_log(&self, entry: NewLogEntry) -> Result<PublishLogEntry> {
        let log = PublishLogEntry {
            id: Uuid::new_v4(),
            post_id: entry.post_id,
            status: entry.status,
            message: entry.message,
            error: entry.error,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO publish_logs (id, post_id, status, message, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.post_id.map(|id| id.to_string()))
        .bind(log.status.as_str())
        .bind(&log.message)
        .bind(&log.error)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(log)
    }

    pub async fn recent_logs(&self, limit: i64) -> Result<Vec<PublishLogEntry>> {
        let rows = sqlx::query("SELECT * FROM publish_logs ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_log).collect()
    }

    // Credentials

    /// Appends a credential row. Older rows are kept as history and
    /// superseded by `created_at` ordering.
    pub async fn store_credential(&self, credential: &Credential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (id, access_token, refresh_token, expires_at, scope, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.scope)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await?;

        info!("Stored credential expiring at {}", credential.expires_at);
        Ok(())
    }

    /// The most recent credential that has not expired yet, if any.
    pub async fn current_credential(&self, now: DateTime<Utc>) -> Result<Option<Credential>> {
        let row = sqlx::query(
            "SELECT * FROM credentials WHERE expires_at > ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_credential).transpose()
    }

    /// The most recent credential regardless of expiry. The refresher reads
    /// this so it can still renew a token that lapsed between runs.
    pub async fn latest_credential(&self) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_credential).transpose()
    }

    // Maintenance

    /// Deletes publish logs and feed items older than the cutoff. Returns
    /// (logs deleted, items deleted).
    pub async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
        let logs = sqlx::query("DELETE FROM publish_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let items = sqlx::query("DELETE FROM feed_items WHERE pub_date < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        info!("Cleanup removed {} old logs and {} old feed items", logs, items);
        Ok((logs, items))
    }

    async fn count_posts(&self, status: PostStatus) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM posts WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let total_posts: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        let total_items: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM feed_items")
            .fetch_one(&self.pool)
            .await?;
        let unprocessed_items: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM feed_items WHERE processed = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStats {
            total_posts,
            draft_posts: self.count_posts(PostStatus::Draft).await?,
            scheduled_posts: self.count_posts(PostStatus::Scheduled).await?,
            published_posts: self.count_posts(PostStatus::Published).await?,
            failed_posts: self.count_posts(PostStatus::Failed).await?,
            total_items,
            unprocessed_items,
        })
    }
}

fn map_feed_item(row: &SqliteRow) -> Result<FeedItem> {
    let tags_json: String = row.try_get("tags")?;
    Ok(FeedItem {
        guid: row.try_get("guid")?,
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        description: row.try_get("description")?,
        pub_date: row.try_get("pub_date")?,
        tags: serde_json::from_str(&tags_json)?,
        processed: row.try_get("processed")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_post(row: &SqliteRow) -> Result<Post> {
    let id: String = row.try_get("id")?;
    let category: String = row.try_get("category")?;
    let origin: String = row.try_get("origin")?;
    let status: String = row.try_get("status")?;

    Ok(Post {
        id: parse_uuid(&id)?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        source_url: row.try_get("source_url")?,
        image_url: row.try_get("image_url")?,
        category: crate::types::Category::parse(&category)
            .ok_or_else(|| PublisherError::Parse(format!("unknown category: {category}")))?,
        origin: PostOrigin::parse(&origin)
            .ok_or_else(|| PublisherError::Parse(format!("unknown origin: {origin}")))?,
        status: PostStatus::parse(&status)
            .ok_or_else(|| PublisherError::Parse(format!("unknown status: {status}")))?,
        scheduled_at: row.try_get("scheduled_at")?,
        published_at: row.try_get("published_at")?,
        external_id: row.try_get("external_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_log(row: &SqliteRow) -> Result<PublishLogEntry> {
    let id: String = row.try_get("id")?;
    let post_id: Option<String> = row.try_get("post_id")?;
    let status: String = row.try_get("status")?;

    Ok(PublishLogEntry {
        id: parse_uuid(&id)?,
        post_id: post_id.as_deref().map(parse_uuid).transpose()?,
        status: LogStatus::parse(&status)
            .ok_or_else(|| PublisherError::Parse(format!("unknown log status: {status}")))?,
        message: row.try_get("message")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_credential(row: &SqliteRow) -> Result<Credential> {
    Ok(Credential {
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        expires_at: row.try_get("expires_at")?,
        scope: row.try_get("scope")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| PublisherError::Parse(format!("invalid uuid {s}: {e}")))
}
