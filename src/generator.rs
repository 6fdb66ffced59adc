use crate::config::GenerationConfig;
use crate::types::{Category, GeneratedContent, PublisherError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const TITLE_MARKER: &str = "---TITLE---";
const CONTENT_MARKER: &str = "---CONTENT---";

#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub link: &'a str,
    pub category: Category,
}

/// Turns an item into social-post prose. Generation is a required step for
/// feed-derived posts, so failures here propagate to the caller instead of
/// degrading to templated output.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn generator_name(&self) -> String;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<GeneratedContent>;
}

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct OpenAiGenerator {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn system_prompt() -> String {
        "You are a professional social-media content creator for a technology audience. \
         Create engaging posts that capture attention and drive discussion. \
         Make titles bold using **markdown**. Avoid ellipsis (...) and generic phrases. \
         Focus on value, insight, and actionable information. \
         Keep the tone professional but friendly, with a few relevant emojis."
            .to_string()
    }

    fn category_instruction(category: Category) -> &'static str {
        match category {
            Category::Tutorial => {
                "Highlight what the reader will learn and why it matters in practice."
            }
            Category::CaseStudy => {
                "Lead with the real-world outcome and the scale it was achieved at."
            }
            Category::Announcement => "Convey what is new and who should care about it.",
            Category::General => "Surface the most interesting insight from the article.",
        }
    }

    fn user_prompt(request: &GenerationRequest<'_>) -> String {
        format!(
            "Create an engaging social-media post based on the following article.\n\n\
             Title: {title}\n\
             Category: {category}\n\
             Description: {description}\n\n\
             Requirements:\n\
             1. A compelling, bold title (use **markdown** for bold)\n\
             2. Engaging body content (3-5 sentences) highlighting key insights\n\
             3. {instruction}\n\
             4. No ellipsis (...) and no filler phrases\n\
             5. End with a call to action or a thought-provoking question\n\
             6. Keep it under 1500 characters\n\n\
             Format your response as:\n\
             {title_marker}\n\
             **Your Bold Title Here**\n\
             {content_marker}\n\
             Your post content here",
            title = request.title,
            category = request.category,
            description = request.description,
            instruction = Self::category_instruction(request.category),
            title_marker = TITLE_MARKER,
            content_marker = CONTENT_MARKER,
        )
    }

    /// Splits a marker-formatted response into title and body, falling back
    /// to the item title and the raw text when the markers are missing.
    fn parse_response(raw: &str, fallback_title: &str) -> GeneratedContent {
        let title_idx = raw.find(TITLE_MARKER);
        let content_idx = raw.find(CONTENT_MARKER);

        match (title_idx, content_idx) {
            (Some(t), Some(c)) if t < c => {
                let title = raw[t + TITLE_MARKER.len()..c].trim().replace("**", "");
                let body = raw[c + CONTENT_MARKER.len()..].trim().to_string();
                GeneratedContent {
                    title: if title.is_empty() {
                        fallback_title.to_string()
                    } else {
                        title
                    },
                    body,
                }
            }
            (_, Some(c)) => GeneratedContent {
                title: fallback_title.to_string(),
                body: raw[c + CONTENT_MARKER.len()..].trim().to_string(),
            },
            _ => GeneratedContent {
                title: fallback_title.to_string(),
                body: raw.trim().to_string(),
            },
        }
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn generator_name(&self) -> String {
        format!("openai ({})", self.model)
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<GeneratedContent> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            PublisherError::Generation("generation API key not configured".into())
        })?;

        debug!("Generating content for: {}", request.title);

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Self::system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(request),
                },
            ],
            temperature: 0.7,
            max_tokens: 1000,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PublisherError::Generation(format!(
                "generation endpoint returned HTTP {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let raw = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if raw.trim().is_empty() {
            return Err(PublisherError::Generation(
                "empty response from generation endpoint".into(),
            ));
        }

        info!("Generated content for: {}", request.title);
        Ok(Self::parse_response(&raw, request.title))
    }
}

/// Canned generator for tests and local development: deterministic output,
/// optionally failing for the first N calls.
pub struct MockGenerator {
    fail_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            fail_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call, as if the upstream service were down.
    pub fn failing() -> Self {
        Self {
            fail_remaining: AtomicUsize::new(usize::MAX),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails the first `n` calls, then succeeds.
    pub fn failing_times(n: usize) -> Self {
        Self {
            fail_remaining: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    fn generator_name(&self) -> String {
        "mock".to_string()
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<GeneratedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(PublisherError::Generation("mock generator failure".into()));
        }

        let summary: String = request.description.chars().take(120).collect();
        Ok(GeneratedContent {
            title: request.title.to_string(),
            body: format!("**{}**\n\n{}\n\nWhat would you build with this?", request.title, summary),
        })
    }
}
