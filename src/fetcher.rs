use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use html_escape::decode_html_entities;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::FeedSource;
use crate::normalizer::{normalize, Article, Enclosure, RawFeedItem};
use crate::timestamp::to_iso_string;

/// Extra attempts after the first failed fetch.
const RETRY_ATTEMPTS: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status code {}", .0.as_u16())]
    Status(StatusCode),

    #[error("Feed parse error: {0}")]
    Parse(#[from] parser::ParseFeedError),
}

impl FetchError {
    /// Upstream HTTP error status when the error carries one, else 500.
    pub fn status(&self) -> u16 {
        let upstream = match self {
            FetchError::Status(code) => Some(*code),
            FetchError::Http(e) => e.status(),
            FetchError::Parse(_) => None,
        };
        upstream
            .filter(|code| code.is_client_error() || code.is_server_error())
            .map(|code| code.as_u16())
            .unwrap_or(500)
    }
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub source: String,
    pub fetched_at: String,
    pub articles: Vec<Article>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub detail: String,
    pub fetched_at: String,
    pub status: u16,
}

impl ErrorEnvelope {
    pub fn new(label: &str, err: &FetchError) -> Self {
        Self {
            error: format!("Failed to fetch or parse {} RSS", label),
            detail: err.to_string(),
            fetched_at: to_iso_string(&Utc::now()),
            status: err.status(),
        }
    }
}

pub struct Fetcher {
    client: Client,
    source: FeedSource,
    backoff: Duration,
}

impl Fetcher {
    pub fn new(source: FeedSource) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(source.timeout_secs))
            .user_agent(source.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            backoff: Duration::from_millis(source.retry_backoff_ms),
            source,
        })
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    /// Fetch the feed at the resolved address and normalize it.
    pub async fn fetch(
        &self,
        source_url: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<FeedResponse, FetchError> {
        let url = self.source.resolve(source_url);
        if source_url.is_some_and(|candidate| candidate != url) {
            debug!("Requested feed URL is not allowed, using {}", url);
        }

        info!("Fetching feed: {} ({})", self.source.label, url);
        let items = self.fetch_with_retry(url).await?;
        let total = items.len();

        let articles = normalize(items, &self.source.label, limit, since);
        info!(
            "Returning {} of {} items for '{}' (limit {}, since {:?})",
            articles.len(),
            total,
            self.source.label,
            limit,
            since
        );

        Ok(FeedResponse {
            source: self.source.label.clone(),
            fetched_at: to_iso_string(&Utc::now()),
            articles,
        })
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Vec<RawFeedItem>, FetchError> {
        let mut attempts_left = RETRY_ATTEMPTS;
        loop {
            match self.fetch_and_parse(url).await {
                Ok(items) => return Ok(items),
                Err(e) if attempts_left > 0 => {
                    attempts_left -= 1;
                    warn!("Fetch of {} failed: {}; retrying in {:?}", url, e, self.backoff);
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!("Failed to fetch feed '{}': {}", url, e);
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<Vec<RawFeedItem>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        let items = Self::parse_items(&bytes)?;
        info!("Parsed {} items from {}", items.len(), url);
        Ok(items)
    }

    /// Parse an RSS/Atom/JSON feed body into raw items.
    pub fn parse_items(bytes: &[u8]) -> Result<Vec<RawFeedItem>, FetchError> {
        // feed_rs drops <pubDate> values it cannot parse; keep the raw text
        let raw_pub_dates = Self::extract_pub_dates_from_xml(bytes);

        let parsed = parser::parse(bytes)?;
        Ok(parsed
            .entries
            .iter()
            .map(|entry| Self::raw_item_from_entry(entry, &raw_pub_dates))
            .collect())
    }

    pub fn raw_item_from_entry(entry: &Entry, raw_pub_dates: &HashMap<String, String>) -> RawFeedItem {
        let link = entry
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| entry.links.first())
            .map(|l| l.href.clone());

        let pub_date = match (&entry.published, &link) {
            (None, Some(link)) => raw_pub_dates.get(link).cloned(),
            _ => None,
        };

        RawFeedItem {
            title: entry.title.as_ref().map(|t| t.content.clone()),
            iso_date: entry.published.as_ref().map(to_iso_string),
            pub_date,
            date: entry.updated.as_ref().map(to_iso_string),
            content_snippet: entry.summary.as_ref().map(|t| t.content.clone()),
            content: entry.content.as_ref().and_then(|c| c.body.clone()),
            enclosure: Self::extract_enclosure(entry),
            link,
        }
    }

    /// First attached media object, else the first `rel="enclosure"` link.
    pub fn extract_enclosure(entry: &Entry) -> Option<Enclosure> {
        let from_media = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|c| {
                c.url.as_ref().map(|url| Enclosure {
                    url: Some(url.to_string()),
                    mime_type: c.content_type.as_ref().map(|m| m.to_string()),
                })
            });

        from_media.or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("enclosure")))
                .map(|l| Enclosure {
                    url: Some(l.href.clone()),
                    mime_type: l.media_type.clone(),
                })
        })
    }

    /// Map each RSS item's `<link>` to its raw `<pubDate>` text.
    pub fn extract_pub_dates_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
        let mut pub_dates = HashMap::new();
        let xml_str = match std::str::from_utf8(xml_bytes) {
            Ok(s) => s,
            Err(_) => return pub_dates,
        };

        let mut rest = xml_str;
        while let Some(pos) = rest.find("<item") {
            let after = &rest[pos + "<item".len()..];
            rest = after;
            // Only <item> or <item attr=...>, not <items> or <itemFoo>
            if !after.starts_with(|c: char| c == '>' || c.is_whitespace()) {
                continue;
            }
            let Some(body_start) = after.find('>') else {
                continue;
            };
            let body = &after[body_start + 1..];
            let item_end = body.find("</item>").unwrap_or(body.len());
            let item = &body[..item_end];
            rest = &body[item_end..];

            let link = Self::extract_xml_element(item, "link").map(|l| Self::decode_xml_text(&l));
            let pub_date = Self::extract_xml_element(item, "pubDate");

            if let (Some(link), Some(pub_date)) = (link, pub_date) {
                if !pub_date.is_empty() {
                    pub_dates.insert(link, pub_date);
                }
            }
        }

        pub_dates
    }

    /// Element text as feed_rs reports it: CDATA unwrapped, entities decoded.
    pub fn decode_xml_text(text: &str) -> String {
        match text
            .strip_prefix("<![CDATA[")
            .and_then(|t| t.strip_suffix("]]>"))
        {
            Some(cdata) => cdata.trim().to_string(),
            None => decode_html_entities(text).trim().to_string(),
        }
    }

    pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
        let start_tag = format!("<{}>", tag);
        let end_tag = format!("</{}>", tag);

        let start = xml.find(&start_tag)? + start_tag.len();
        let end = xml[start..].find(&end_tag)? + start;

        Some(xml[start..end].trim().to_string())
    }
}
