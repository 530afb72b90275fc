use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::limiter::RateLimiter;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; FeedHub/1.0)";
const ACCEPT_FEED: &str =
    "application/rss+xml, application/xml, text/xml, application/atom+xml, */*";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";

/// What the caller expects in the response body. Content-type validation
/// only applies when a feed document is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Feed,
    Html,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Retries after the first attempt; the final attempt's result is
    /// returned as-is.
    pub max_retries: u32,
    /// Backoff before retry n is `backoff_base * 2^n`.
    pub backoff_base: Duration,
    pub timeout: Duration,
    /// Proxy endpoint re-issued as `{proxy_url}?url=<target>` when the
    /// direct request fails at the connection level.
    pub proxy_url: Option<String>,
}

/// The single HTTP fetch path for every network call site: feed downloads
/// and article-page scrapes both go through here, and every attempt passes
/// through the shared rate limiter first.
pub struct Fetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(limiter: Arc<RateLimiter>, config: FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            limiter,
            config,
        }
    }

    /// Fetch a feed document. The response must declare an XML or text
    /// content type and carry a non-empty body.
    pub async fn fetch_feed(&self, url: &str) -> Result<String, FetchError> {
        self.fetch(url, Expect::Feed).await
    }

    /// Fetch an article page for scraping. No content-type restriction.
    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        self.fetch(url, Expect::Html).await
    }

    async fn fetch(&self, url: &str, expect: Expect) -> Result<String, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(url, expect).await {
                Ok(body) => return Ok(body),
                Err(error) if attempt >= self.config.max_retries => return Err(error),
                Err(error) => {
                    let delay = self.config.backoff_base * 2u32.pow(attempt);
                    warn!(
                        url,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "fetch failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt: the direct request, re-issued through the proxy when
    /// the direct request dies at the connection level (not merely non-2xx).
    async fn attempt(&self, url: &str, expect: Expect) -> Result<String, FetchError> {
        self.limiter.acquire().await;

        match self.request(url, expect).await {
            Err(FetchError::Network(reason)) => {
                let Some(base) = self.config.proxy_url.as_deref() else {
                    return Err(FetchError::Network(reason));
                };
                let proxied = proxied_url(base, url)?;
                debug!(url, "direct request failed, retrying through proxy");
                self.request(&proxied, expect).await
            }
            other => other,
        }
    }

    async fn request(&self, url: &str, expect: Expect) -> Result<String, FetchError> {
        let accept = match expect {
            Expect::Feed => ACCEPT_FEED,
            Expect::Html => ACCEPT_HTML,
        };

        let response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        if expect == Expect::Feed {
            if let Some(content_type) = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
            {
                if !content_type.contains("xml") && !content_type.contains("text") {
                    return Err(FetchError::UnsupportedContentType(content_type.to_string()));
                }
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(body)
    }
}

fn proxied_url(base: &str, target: &str) -> Result<String, FetchError> {
    let mut proxied =
        Url::parse(base).map_err(|e| FetchError::Network(format!("invalid proxy URL: {e}")))?;
    proxied.query_pairs_mut().append_pair("url", target);
    Ok(proxied.to_string())
}
