//! Turns loosely-shaped feed items into the public [`Article`] list.
//!
//! Everything in here is pure: no I/O, no clock. Per-item data problems
//! degrade the affected fields to empty strings instead of failing the batch.

use chrono::{DateTime, Utc};
use html_escape::decode_html_entities;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::timestamp::{parse_timestamp, to_iso_string};

pub const SUMMARY_MAX_CHARS: usize = 280;

static TAG_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:<[^>]*>)+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static IMAGE_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:jpe?g|png|gif|webp|svg)(?:\?.*)?$").unwrap());
static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?[\s"'/]src\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Media attached to a feed item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Enclosure {
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
}

/// One feed entry before normalization. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawFeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub iso_date: Option<String>,
    pub pub_date: Option<String>,
    pub date: Option<String>,
    pub content_snippet: Option<String>,
    pub content: Option<String>,
    pub enclosure: Option<Enclosure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub published: String,
    pub summary: String,
    pub source: String,
    pub image: String,
}

type DateField = fn(&RawFeedItem) -> Option<&str>;

/// Date-bearing fields, highest priority first.
const DATE_FIELDS: [(&str, DateField); 3] = [
    ("isoDate", iso_date_field),
    ("pubDate", pub_date_field),
    ("date", date_field),
];

fn iso_date_field(item: &RawFeedItem) -> Option<&str> {
    item.iso_date.as_deref()
}

fn pub_date_field(item: &RawFeedItem) -> Option<&str> {
    item.pub_date.as_deref()
}

fn date_field(item: &RawFeedItem) -> Option<&str> {
    item.date.as_deref()
}

struct Candidate {
    published_at: Option<DateTime<Utc>>,
    article: Article,
}

/// Sort newest first, drop items older than `since`, keep at most `limit`.
pub fn normalize(
    items: Vec<RawFeedItem>,
    source: &str,
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> Vec<Article> {
    let mut candidates: Vec<Candidate> = items
        .iter()
        .map(|item| {
            let published_at = extract_published_at(item);
            Candidate {
                published_at,
                article: Article {
                    title: item.title.as_deref().unwrap_or_default().trim().to_string(),
                    link: item.link.clone().unwrap_or_default(),
                    published: published_at.as_ref().map(to_iso_string).unwrap_or_default(),
                    summary: extract_summary(item),
                    source: source.to_string(),
                    image: extract_image(item).unwrap_or_default(),
                },
            }
        })
        .collect();

    // Option orders None below Some, so descending puts undated items last.
    candidates.sort_by(|a, b| b.published_at.cmp(&a.published_at));

    candidates
        .into_iter()
        .filter(|c| match since {
            Some(bound) => c.published_at.is_some_and(|t| t >= bound),
            None => true,
        })
        .take(limit)
        .map(|c| c.article)
        .collect()
}

/// First present date field, parsed. A field that fails to parse does not
/// fall through to the next one.
pub fn extract_published_at(item: &RawFeedItem) -> Option<DateTime<Utc>> {
    DATE_FIELDS
        .iter()
        .find_map(|(_, field)| field(item).filter(|v| !v.is_empty()))
        .and_then(parse_timestamp)
}

pub fn extract_summary(item: &RawFeedItem) -> String {
    item.content_snippet
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| item.content.as_deref().filter(|s| !s.is_empty()))
        .map(clean_summary)
        .unwrap_or_default()
}

/// Strip markup, decode entities, collapse whitespace, hard-cut to
/// [`SUMMARY_MAX_CHARS`].
pub fn clean_summary(raw: &str) -> String {
    let without_tags = TAG_RUN.replace_all(raw, " ");
    // Decoded `&lt;` must not reintroduce tag delimiters.
    let decoded = decode_html_entities(&without_tags);
    let without_brackets = decoded.replace(['<', '>'], " ");
    let collapsed = WHITESPACE.replace_all(&without_brackets, " ");
    collapsed.trim().chars().take(SUMMARY_MAX_CHARS).collect()
}

pub fn extract_image(item: &RawFeedItem) -> Option<String> {
    item.enclosure
        .as_ref()
        .and_then(enclosure_image)
        .or_else(|| item.content.as_deref().and_then(first_img_src))
        .or_else(|| item.content_snippet.as_deref().and_then(first_img_src))
}

fn enclosure_image(enclosure: &Enclosure) -> Option<String> {
    let url = enclosure.url.as_deref().filter(|u| !u.is_empty())?;
    let is_image = match enclosure.mime_type.as_deref().filter(|t| !t.is_empty()) {
        Some(mime) => mime.to_ascii_lowercase().starts_with("image/"),
        None => IMAGE_EXTENSION.is_match(url),
    };
    is_image.then(|| url.to_string())
}

pub fn first_img_src(html: &str) -> Option<String> {
    IMG_SRC
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
