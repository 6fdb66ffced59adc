use crate::types::{Category, GeneratedContent, PublisherError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// How far back from the length limit a sentence boundary may sit and still
/// count as an acceptable cut point.
const TRUNCATION_TOLERANCE: usize = 500;

const ELLIPSIS: &str = "...";

const BASE_HASHTAGS: &[&str] = &["#Tech", "#SoftwareEngineering", "#Innovation"];

/// Fixed title-keyword to hashtag table. Matching is substring-based over
/// the lowercased title.
const TITLE_KEYWORD_TAGS: &[(&str, &str)] = &[
    ("ai", "#AI"),
    ("search", "#Search"),
    ("vector", "#VectorSearch"),
    ("performance", "#Performance"),
    ("security", "#Security"),
    ("cloud", "#Cloud"),
    ("analytics", "#Analytics"),
    ("database", "#Database"),
    ("optimization", "#Optimization"),
    ("open source", "#OpenSource"),
];

fn category_hashtags(category: Category) -> &'static [&'static str] {
    match category {
        Category::Tutorial => &["#Tutorial", "#Learning", "#Development", "#Programming"],
        Category::CaseStudy => &["#CaseStudy", "#Success", "#Enterprise", "#Scale"],
        Category::Announcement => &["#News", "#Update", "#Innovation", "#Technology"],
        Category::General => &["#Engineering", "#TechTips", "#Development"],
    }
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&[a-zA-Z0-9#]+;").unwrap())
}

/// Strips HTML and feed boilerplate from a raw description. Pure and
/// idempotent: cleaning already-clean text is a no-op.
pub fn clean_description(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let stripped = tag_re().replace_all(raw, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'");
    let decoded = entity_re().replace_all(&decoded, "");

    let trimmed = strip_footers(&decoded);

    collapse_whitespace(&trimmed)
}

/// Cuts known feed footer boilerplate ("The post … first appeared on …",
/// "Continue reading …") from the first occurrence to the end of the text.
fn strip_footers(text: &str) -> String {
    let mut out = text.to_string();

    if let Some(idx) = out.find("The post") {
        if out[idx..].contains("first appeared on") {
            out.truncate(idx);
        }
    }
    if let Some(idx) = out.find("Continue reading") {
        out.truncate(idx);
    }

    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `n` characters of `s` (not bytes), never splitting a code point.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Key-points paragraph for the templated mode: the first one or two
/// non-trivial paragraphs, padded from the full text when short and
/// word-boundary trimmed when long.
pub fn extract_key_points(description: &str) -> String {
    if description.len() < 50 {
        return "Fresh insights and practical techniques to improve your development workflow."
            .to_string();
    }

    let paragraphs: Vec<&str> = description
        .split('\n')
        .filter(|p| p.trim().len() > 20)
        .collect();
    let mut main = collapse_whitespace(&paragraphs[..paragraphs.len().min(2)].join(" "));
    if main.is_empty() {
        main = collapse_whitespace(description);
    }

    if main.chars().count() < 200 {
        let all = collapse_whitespace(description);
        if all.chars().count() > main.chars().count() {
            main = take_chars(&all, 400).trim().to_string();
        }
    }

    if main.chars().count() > 500 {
        let trimmed = take_chars(&main, 480);
        let cut = trimmed.rfind(' ').unwrap_or(trimmed.len());
        main = format!("{}{}", &trimmed[..cut], ELLIPSIS);
    }

    main
}

/// Builds the hashtag line: three base tags, up to two category tags, up to
/// two title-derived tags, de-duplicated in order.
pub fn generate_hashtags(title: &str, category: Category) -> String {
    let title_lower = title.to_lowercase();
    let title_tags: Vec<&str> = TITLE_KEYWORD_TAGS
        .iter()
        .filter(|(keyword, _)| title_lower.contains(keyword))
        .map(|(_, tag)| *tag)
        .take(2)
        .collect();

    let mut selected: Vec<&str> = Vec::new();
    for tag in BASE_HASHTAGS
        .iter()
        .chain(category_hashtags(category).iter().take(2))
        .chain(title_tags.iter())
    {
        if !selected.contains(tag) {
            selected.push(tag);
        }
    }

    selected.join(" ")
}

/// Deterministic templated post body: title, extracted key points, link,
/// and hashtags in a per-category frame.
pub fn render_template(
    title: &str,
    description: &str,
    link: &str,
    category: Category,
    max_len: usize,
) -> String {
    let key_points = extract_key_points(description);
    let hashtags = generate_hashtags(title, category);

    let content = match category {
        Category::Tutorial => format!(
            "🎯 {title}\n\n{key_points}\n\n🔗 Read more: {link}\n\n{hashtags}"
        ),
        Category::CaseStudy => format!(
            "📊 {title}\n\n{key_points}\n\n🔗 Full case study: {link}\n\n{hashtags}"
        ),
        Category::Announcement => format!(
            "🎉 {title}\n\n{key_points}\n\n🔗 Learn more: {link}\n\n{hashtags}"
        ),
        Category::General => format!(
            "📰 {title}\n\n{key_points}\n\n🔗 Read article: {link}\n\n{hashtags}"
        ),
    };

    enforce_length(&content, max_len, TruncationMode::Templated)
}

/// Final cleanup of generator output: reject empty bodies, drop a trailing
/// ellipsis, make sure the source link is present, and enforce the length
/// limit without ever ending in an ellipsis.
pub fn format_generated(
    generated: &GeneratedContent,
    link: &str,
    max_len: usize,
) -> Result<String> {
    let mut body = generated.body.trim().to_string();
    if body.is_empty() {
        return Err(PublisherError::Generation(
            "generator returned an empty body".into(),
        ));
    }

    while body.ends_with(ELLIPSIS) {
        body.truncate(body.len() - ELLIPSIS.len());
        body = body.trim_end().to_string();
    }

    if !body.contains("http") && !link.is_empty() {
        body = format!("{body}\n\n🔗 Read more: {link}");
    }

    Ok(enforce_length(&body, max_len, TruncationMode::Generated))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Never ends in an ellipsis; prefers a clean sentence boundary.
    Generated,
    /// May end in an ellipsis, but only when no sentence boundary lies
    /// within tolerance of the limit.
    Templated,
}

/// Hard length contract: the result never exceeds `max_len` characters.
/// Cuts at the last sentence-ending period or newline within
/// `TRUNCATION_TOLERANCE` characters of the limit; otherwise hard-cuts.
pub fn enforce_length(text: &str, max_len: usize, mode: TruncationMode) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let window = take_chars(text, max_len);

    // Position (in chars) just after the last '.' or '\n' in the window.
    let mut cut_after: Option<usize> = None;
    for (pos, ch) in window.chars().enumerate() {
        if ch == '.' || ch == '\n' {
            cut_after = Some(pos + 1);
        }
    }

    if let Some(cut) = cut_after {
        if cut + TRUNCATION_TOLERANCE >= max_len {
            let out = take_chars(window, cut).trim_end().to_string();
            return match mode {
                TruncationMode::Generated => strip_trailing_ellipsis(out),
                TruncationMode::Templated => out,
            };
        }
    }

    match mode {
        TruncationMode::Generated => strip_trailing_ellipsis(window.trim_end().to_string()),
        TruncationMode::Templated => {
            let head = take_chars(window, max_len.saturating_sub(ELLIPSIS.len()));
            format!("{}{}", head.trim_end(), ELLIPSIS)
        }
    }
}

fn strip_trailing_ellipsis(mut text: String) -> String {
    while text.ends_with(ELLIPSIS) {
        text.truncate(text.len() - ELLIPSIS.len());
        text.truncate(text.trim_end().len());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_tags_entities_and_footer() {
        let raw = "<p>Hello &amp; world. The post Hello first appeared on X.</p>";
        assert_eq!(clean_description(raw), "Hello & world.");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let raw = "<div>Rust &lt;3 &quot;systems&quot;&nbsp;code</div>";
        let once = clean_description(raw);
        assert_eq!(clean_description(&once), once);
    }

    #[test]
    fn strips_continue_reading_footer() {
        let raw = "Great article body. Continue reading on the blog";
        assert_eq!(clean_description(raw), "Great article body.");
    }

    #[test]
    fn removes_unknown_entities() {
        assert_eq!(clean_description("a&hellip;b"), "ab");
    }

    #[test]
    fn hashtags_include_base_category_and_title_tags() {
        let tags = generate_hashtags("Vector search performance", Category::Tutorial);
        assert!(tags.starts_with("#Tech #SoftwareEngineering #Innovation"));
        assert!(tags.contains("#Tutorial"));
        assert!(tags.contains("#Search"));
        // at most 3 + 2 + 2 tags
        assert!(tags.split(' ').count() <= 7);
    }

    #[test]
    fn hashtags_are_deduplicated() {
        for category in [
            Category::Tutorial,
            Category::CaseStudy,
            Category::Announcement,
            Category::General,
        ] {
            let tags = generate_hashtags("Cloud database optimization", category);
            let list: Vec<&str> = tags.split(' ').collect();
            let unique: std::collections::HashSet<&str> = list.iter().copied().collect();
            assert_eq!(list.len(), unique.len(), "duplicate tag in {tags}");
        }
    }

    #[test]
    fn template_fits_limit_and_carries_link() {
        let body = render_template(
            "A guide to indexes",
            "Indexes make queries faster. They also cost writes.",
            "https://example.com/indexes",
            Category::Tutorial,
            3000,
        );
        assert!(body.chars().count() <= 3000);
        assert!(body.contains("https://example.com/indexes"));
        assert!(body.contains("#Tutorial"));
    }

    #[test]
    fn enforce_length_prefers_sentence_boundary() {
        let text = format!("First sentence. Second sentence.{}", "x".repeat(100));
        let out = enforce_length(&text, 40, TruncationMode::Generated);
        assert_eq!(out, "First sentence. Second sentence.");
        assert!(!out.ends_with(ELLIPSIS));
    }

    #[test]
    fn enforce_length_hard_cuts_generated_without_ellipsis() {
        let text = "y".repeat(600);
        let out = enforce_length(&text, 550, TruncationMode::Generated);
        assert_eq!(out.chars().count(), 550);
        assert!(!out.ends_with(ELLIPSIS));
    }

    #[test]
    fn enforce_length_hard_cut_templated_uses_ellipsis() {
        let text = "y".repeat(600);
        let out = enforce_length(&text, 550, TruncationMode::Templated);
        assert!(out.chars().count() <= 550);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn boundary_outside_tolerance_is_ignored() {
        // Lone period sits 599 chars before the limit; hard cut applies.
        let text = format!("A.{}", "z".repeat(800));
        let out = enforce_length(&text, 601, TruncationMode::Templated);
        assert!(out.ends_with(ELLIPSIS));
        assert!(out.chars().count() <= 601);
    }

    #[test]
    fn generated_body_gets_link_appended() {
        let generated = GeneratedContent {
            title: "T".into(),
            body: "Insightful words".into(),
        };
        let out = format_generated(&generated, "https://example.com/post", 3000).unwrap();
        assert!(out.contains("https://example.com/post"));
    }

    #[test]
    fn generated_body_keeps_existing_link() {
        let generated = GeneratedContent {
            title: "T".into(),
            body: "Read https://example.com/original today".into(),
        };
        let out = format_generated(&generated, "https://example.com/other", 3000).unwrap();
        assert!(!out.contains("example.com/other"));
    }

    #[test]
    fn generated_trailing_ellipsis_is_stripped() {
        let generated = GeneratedContent {
            title: "T".into(),
            body: "A thought that trails off...".into(),
        };
        let out = format_generated(&generated, "", 3000).unwrap();
        assert!(!out.ends_with(ELLIPSIS));
    }

    #[test]
    fn empty_generated_body_is_rejected() {
        let generated = GeneratedContent {
            title: "T".into(),
            body: "   ".into(),
        };
        assert!(format_generated(&generated, "https://example.com", 3000).is_err());
    }

    #[test]
    fn key_points_fallback_for_thin_descriptions() {
        let points = extract_key_points("short");
        assert!(points.len() > 20);
    }

    #[test]
    fn key_points_trims_long_text_at_word_boundary() {
        let long = "word ".repeat(200);
        let points = extract_key_points(&long);
        assert!(points.chars().count() <= 500);
        assert!(points.ends_with(ELLIPSIS));
        assert!(!points.trim_end_matches(ELLIPSIS).ends_with("wor"));
    }
}
