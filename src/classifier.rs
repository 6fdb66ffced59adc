use crate::types::Category;

const TUTORIAL_KEYWORDS: &[&str] = &[
    "tutorial",
    "how to",
    "guide",
    "step by step",
    "getting started",
    "learn",
    "master",
    "tip",
    "best practice",
    "optimization",
    "performance",
    "trick",
    "advice",
];

const CASE_STUDY_KEYWORDS: &[&str] = &[
    "case study",
    "success story",
    "customer story",
    "real world",
    "implementation",
    "deployment",
];

const ANNOUNCEMENT_KEYWORDS: &[&str] = &[
    "announcement",
    "release",
    "new",
    "introducing",
    "launched",
    "available",
    "update",
];

/// Maps an item's text to a category by case-insensitive keyword match over
/// title, body, and any feed-supplied tags. Evaluation order matters: the
/// first category whose keyword list matches wins.
pub fn classify(title: &str, body: &str, tags: &[String]) -> Category {
    let mut haystack = String::with_capacity(title.len() + body.len() + 32);
    haystack.push_str(title);
    haystack.push(' ');
    haystack.push_str(body);
    for tag in tags {
        haystack.push(' ');
        haystack.push_str(tag);
    }
    let haystack = haystack.to_lowercase();

    let matches = |keywords: &[&str]| keywords.iter().any(|k| haystack.contains(k));

    if matches(TUTORIAL_KEYWORDS) {
        Category::Tutorial
    } else if matches(CASE_STUDY_KEYWORDS) {
        Category::CaseStudy
    } else if matches(ANNOUNCEMENT_KEYWORDS) {
        Category::Announcement
    } else {
        Category::General
    }
}
