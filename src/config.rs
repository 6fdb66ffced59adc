use crate::types::{PublisherError, Result};
use chrono::NaiveTime;
use std::env;
use std::time::Duration;

/// Weekly posting schedule. Days use 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone)]
pub struct PostingConfig {
    pub days: Vec<u8>,
    pub time: NaiveTime,
    pub max_post_length: usize,
    pub include_images: bool,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub fallback_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct SocialConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Firing cadence of the four background jobs.
#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub ingest: Duration,
    pub publish: Duration,
    pub cleanup: Duration,
    pub refresh: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            ingest: Duration::from_secs(6 * 60 * 60),
            publish: Duration::from_secs(60),
            cleanup: Duration::from_secs(24 * 60 * 60),
            refresh: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub posting: PostingConfig,
    pub feed: FeedConfig,
    pub generation: GenerationConfig,
    pub social: SocialConfig,
    pub intervals: JobIntervals,
}

impl AppConfig {
    /// Reads configuration from the environment (a `.env` file is honored)
    /// and validates it. Invalid schedule settings fail loudly here rather
    /// than at the first allocation.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let posting = PostingConfig {
            days: parse_posting_days(&env_or("POSTING_DAYS", "2,5"))?,
            time: parse_posting_time(&env_or("POSTING_TIME", "10:30"))?,
            max_post_length: env_or("MAX_POST_LENGTH", "3000")
                .parse()
                .map_err(|_| PublisherError::Config("MAX_POST_LENGTH must be an integer".into()))?,
            include_images: env_or("INCLUDE_IMAGES", "false") == "true",
        };

        let feed = FeedConfig {
            url: env_or("FEED_URL", ""),
            fallback_urls: env_or("FEED_FALLBACK_URLS", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        };

        let generation = GenerationConfig {
            api_base: env_or("OPENAI_API_BASE", "https://api.openai.com/v1"),
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: env_or("OPENAI_MODEL", "gpt-3.5-turbo"),
        };

        let social = SocialConfig {
            client_id: env_or("LINKEDIN_CLIENT_ID", ""),
            client_secret: env_or("LINKEDIN_CLIENT_SECRET", ""),
            redirect_uri: env_or(
                "LINKEDIN_REDIRECT_URI",
                "http://localhost:3000/auth/linkedin/callback",
            ),
        };

        let config = Self {
            database_url: env_or("DATABASE_URL", "sqlite:feed_publisher.db?mode=rwc"),
            posting,
            feed,
            generation,
            social,
            intervals: JobIntervals::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.posting.days.is_empty() {
            return Err(PublisherError::Config(
                "at least one posting day must be configured".into(),
            ));
        }
        if self.feed.url.is_empty() && self.feed.fallback_urls.is_empty() {
            return Err(PublisherError::Config("FEED_URL is not set".into()));
        }
        if self.posting.max_post_length == 0 {
            return Err(PublisherError::Config(
                "MAX_POST_LENGTH must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// All feed URLs in fetch order: primary first, then fallbacks.
    pub fn feed_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if !self.feed.url.is_empty() {
            urls.push(self.feed.url.clone());
        }
        urls.extend(self.feed.fallback_urls.iter().cloned());
        urls
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_posting_days(raw: &str) -> Result<Vec<u8>> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day: u8 = part
            .parse()
            .map_err(|_| PublisherError::Config(format!("invalid posting day: {part}")))?;
        if day > 6 {
            return Err(PublisherError::Config(format!(
                "posting day out of range (0-6): {day}"
            )));
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Ok(days)
}

fn parse_posting_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| PublisherError::Config(format!("POSTING_TIME must be HH:MM, got {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_posting_days_and_dedups() {
        assert_eq!(parse_posting_days("2,5").unwrap(), vec![2, 5]);
        assert_eq!(parse_posting_days("5, 2, 5").unwrap(), vec![2, 5]);
    }

    #[test]
    fn rejects_out_of_range_day() {
        assert!(parse_posting_days("7").is_err());
    }

    #[test]
    fn parses_time() {
        let t = parse_posting_time("10:30").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        assert!(parse_posting_time("1030").is_err());
    }
}
