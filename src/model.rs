use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One feed source as supplied by the caller. Identity key is `url`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    pub url: String,
    #[serde(default)]
    pub category: String,
}

/// A normalized feed entry. Produced by the normalizer and never mutated
/// afterwards; image resolution yields a derived value instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure_media_type: Option<String>,
    pub source: String,
    pub category: String,
}
