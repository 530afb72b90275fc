use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{EntryState, TtlCache};
use crate::fetcher::Fetcher;
use crate::model::FeedItem;

/// Meta tags checked first, in priority order.
const META_SOURCES: &[&str] = &[
    r#"meta[property="og:image"]"#,
    r#"meta[property="og:image:secure_url"]"#,
    r#"meta[name="twitter:image"]"#,
    r#"meta[name="twitter:image:src"]"#,
    r#"meta[itemprop="image"]"#,
];

/// Site icons, consulted after the meta tags.
const ICON_SOURCES: &[&str] = &[
    r#"link[rel="apple-touch-icon"]"#,
    r#"link[rel="icon"]"#,
];

/// Featured-image and common content containers, in priority order.
const CONTAINER_IMAGES: &[&str] = &[
    ".featured-image img, .post-thumbnail img, .article-featured-image img",
    "article img, .post-content img, .entry-content img, .content img",
];

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub min_width: u32,
    pub min_height: u32,
    pub placeholder: String,
    pub cache_ttl: Duration,
}

/// Outcome of resolving an image for an article. `status` doubles as the
/// negative-cache state: an `error`/`not-found` resolution is served from
/// cache until it expires, so a failing source is not hammered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResolution {
    pub image_url: String,
    pub status: EntryState,
}

/// Resolves a representative image for an item or article. Never fails:
/// every failure path degrades to the placeholder URL.
pub struct ImageResolver {
    fetcher: Arc<Fetcher>,
    resolutions: TtlCache<ImageResolution>,
    pages: TtlCache<String>,
    config: ImageConfig,
    img_tag: Regex,
}

impl ImageResolver {
    pub fn new(fetcher: Arc<Fetcher>, config: ImageConfig) -> Self {
        Self {
            fetcher,
            resolutions: TtlCache::new(config.cache_ttl),
            pages: TtlCache::new(config.cache_ttl),
            img_tag: Regex::new(r#"<img[^>]+src\s*=\s*["']([^"']+)["']"#)
                .expect("valid img regex"),
            config,
        }
    }

    /// Resolve an image for a feed item: enclosure media type first, then
    /// the first image embedded in the description, then the article page.
    pub async fn resolve(&self, item: &FeedItem) -> ImageResolution {
        if let (Some(url), Some(media_type)) = (&item.enclosure_url, &item.enclosure_media_type) {
            if media_type.starts_with("image/") {
                return ImageResolution {
                    image_url: url.clone(),
                    status: EntryState::Success,
                };
            }
        }

        if let Some(src) = self.description_image(item) {
            return ImageResolution {
                image_url: src,
                status: EntryState::Success,
            };
        }

        self.resolve_article(&item.link).await.0
    }

    /// Resolve an image for an article URL, fetching and scraping the page
    /// on a cache miss. Returns the resolution and whether it was served
    /// from cache.
    pub async fn resolve_article(&self, article_url: &str) -> (ImageResolution, bool) {
        if let Some(entry) = self.resolutions.get(article_url).await {
            debug!(url = article_url, status = ?entry.state, "image cache hit");
            return (entry.value, true);
        }

        let resolution = match self.scrape_article(article_url).await {
            Ok(Some(image_url)) => ImageResolution {
                image_url,
                status: EntryState::Success,
            },
            Ok(None) => ImageResolution {
                image_url: self.config.placeholder.clone(),
                status: EntryState::NotFound,
            },
            Err(error) => {
                warn!(url = article_url, error = %error, "article image fetch failed");
                ImageResolution {
                    image_url: self.config.placeholder.clone(),
                    status: EntryState::Error,
                }
            }
        };

        self.resolutions
            .insert(article_url, resolution.clone(), resolution.status)
            .await;
        (resolution, false)
    }

    fn description_image(&self, item: &FeedItem) -> Option<String> {
        let src = self
            .img_tag
            .captures(&item.description)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())?;
        absolutize(src, &item.link)
    }

    async fn scrape_article(&self, article_url: &str) -> Result<Option<String>, crate::error::FetchError> {
        let html = match self.pages.get(article_url).await {
            Some(entry) => entry.value,
            None => {
                let body = self.fetcher.fetch_page(article_url).await?;
                self.pages
                    .insert(article_url, body.clone(), EntryState::Success)
                    .await;
                body
            }
        };

        Ok(extract_image_url(
            &html,
            article_url,
            self.config.min_width,
            self.config.min_height,
        ))
    }
}

/// Pick an image URL out of an article page, first match wins:
/// Open Graph → Twitter card → schema.org → site icons → featured/content
/// containers → any `<img>` with declared dimensions above the minimum.
pub fn extract_image_url(
    html: &str,
    page_url: &str,
    min_width: u32,
    min_height: u32,
) -> Option<String> {
    let document = Html::parse_document(html);
    let mut candidates: Vec<String> = Vec::new();

    for source in META_SOURCES {
        let selector = Selector::parse(source).expect("valid meta selector");
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
        {
            candidates.push(content.to_string());
        }
    }

    for source in ICON_SOURCES {
        let selector = Selector::parse(source).expect("valid icon selector");
        if let Some(href) = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("href"))
        {
            candidates.push(href.to_string());
        }
    }

    for group in CONTAINER_IMAGES {
        let selector = Selector::parse(group).expect("valid container selector");
        for img in document.select(&selector) {
            if let Some(src) = img.value().attr("src") {
                candidates.push(src.to_string());
            }
        }
    }

    // Last resort: any image that declares a reasonable size. Lazy-loaded
    // images keep the real URL in data-src.
    let any_img = Selector::parse("img").expect("valid img selector");
    for img in document.select(&any_img) {
        let width: u32 = img
            .value()
            .attr("width")
            .and_then(|w| w.parse().ok())
            .unwrap_or(0);
        let height: u32 = img
            .value()
            .attr("height")
            .and_then(|h| h.parse().ok())
            .unwrap_or(0);
        if width >= min_width && height >= min_height {
            if let Some(src) = img.value().attr("data-src").or_else(|| img.value().attr("src")) {
                candidates.push(src.to_string());
            }
        }
    }

    candidates
        .into_iter()
        .find_map(|src| absolutize(&src, page_url))
}

/// Make an image URL absolute: pass absolute URLs through, default
/// protocol-relative URLs to https, resolve the rest against the page URL.
fn absolutize(src: &str, page_url: &str) -> Option<String> {
    if src.starts_with("http://") || src.starts_with("https://") {
        return Some(src.to_string());
    }
    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let base = Url::parse(page_url).ok()?;
    base.join(src).ok().map(|resolved| resolved.to_string())
}
