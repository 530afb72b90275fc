use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::aggregator::AggregatorConfig;
use crate::fetcher::FetchConfig;
use crate::image::ImageConfig;
use crate::limiter::RateLimitConfig;

/// Engine configuration. Every value has a default, so an absent file or
/// an empty table still yields a working configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub images: ImageSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Deadline for one whole aggregate call, in seconds.
    #[serde(default = "default_aggregate_timeout_secs")]
    pub aggregate_timeout_secs: u64,
    /// Optional cap on concurrent source fetches.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_aggregate_timeout_secs() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            aggregate_timeout_secs: default_aggregate_timeout_secs(),
            max_concurrency: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    15
}

fn default_min_delay_ms() -> u64 {
    300
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            min_delay_ms: default_min_delay_ms(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            window: Duration::from_secs(self.window_secs),
            max_requests: self.max_requests,
            min_delay: Duration::from_millis(self.min_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Proxy endpoint used when a direct request fails at the connection
    /// level; requests become `{proxy_url}?url=<target>`.
    #[serde(default)]
    pub proxy_url: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            timeout_secs: default_timeout_secs(),
            proxy_url: None,
        }
    }
}

impl FetchSettings {
    pub fn to_fetch(&self) -> FetchConfig {
        FetchConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            proxy_url: self.proxy_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    /// Freshness window for aggregate results, in seconds.
    #[serde(default = "default_feed_ttl_secs")]
    pub feed_ttl_secs: u64,
    /// Freshness window for image resolutions and fetched pages, in seconds.
    #[serde(default = "default_image_ttl_secs")]
    pub image_ttl_secs: u64,
}

fn default_feed_ttl_secs() -> u64 {
    300
}

fn default_image_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            feed_ttl_secs: default_feed_ttl_secs(),
            image_ttl_secs: default_image_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageSettings {
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_min_width() -> u32 {
    200
}

fn default_min_height() -> u32 {
    150
}

fn default_placeholder() -> String {
    "/placeholder.svg".to_string()
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            placeholder: default_placeholder(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    /// A present-but-invalid file is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            timeout: Duration::from_secs(self.server.aggregate_timeout_secs),
            max_concurrency: self.server.max_concurrency,
            cache_ttl: Duration::from_secs(self.cache.feed_ttl_secs),
        }
    }

    pub fn image(&self) -> ImageConfig {
        ImageConfig {
            min_width: self.images.min_width,
            min_height: self.images.min_height,
            placeholder: self.images.placeholder.clone(),
            cache_ttl: Duration::from_secs(self.cache.image_ttl_secs),
        }
    }
}
