use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_FEED_URL: &str = "https://www.theverge.com/rss/index.xml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub feed: FeedSource,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

/// The one feed this service reads, plus the addresses callers may swap in.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedSource {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_feed_url")]
    pub default_url: String,
    #[serde(default = "default_allowed_urls")]
    pub allowed_urls: Vec<String>,
    /// Delay before the single retry, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_label() -> String {
    "The Verge".to_string()
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_allowed_urls() -> Vec<String> {
    vec![DEFAULT_FEED_URL.to_string()]
}

fn default_retry_backoff_ms() -> u64 {
    400
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "VergeFeed/1.0 (RSS Normalizer)".to_string()
}

impl Default for FeedSource {
    fn default() -> Self {
        Self {
            label: default_label(),
            default_url: default_feed_url(),
            allowed_urls: default_allowed_urls(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            feed: FeedSource::default(),
        }
    }
}

impl FeedSource {
    /// Map a caller-supplied address to one we are willing to fetch.
    ///
    /// Only exact allow-list matches pass; everything else, including no
    /// candidate at all, becomes the default address.
    pub fn resolve<'a>(&'a self, candidate: Option<&'a str>) -> &'a str {
        match candidate {
            Some(url) if url == self.default_url || self.allowed_urls.iter().any(|a| a == url) => {
                url
            }
            _ => self.default_url.as_str(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
