use chrono::{DateTime, Utc};
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::error::FetchError;
use crate::model::{FeedItem, FeedSource};

/// Parses RSS 2.0 / Atom documents into the canonical item shape.
///
/// All derivation is deterministic: fixed fallback order per field, no
/// heuristics. feed-rs locates the RSS `channel` or Atom `feed` root and
/// always yields entries as a sequence, so a document with a single
/// `item`/`entry` comes out as a one-element list.
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one fetched document. `fetched_at` substitutes for
    /// missing publication dates so downstream sorting never deals with
    /// absent values.
    pub fn normalize(
        &self,
        raw_xml: &str,
        source: &FeedSource,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<FeedItem>, FetchError> {
        let feed =
            parser::parse(raw_xml.as_bytes()).map_err(|e| FetchError::Parse(e.to_string()))?;

        let source_title = feed
            .title
            .as_ref()
            .map(|t| decode_html_entities(&t.content).into_owned())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| source.url.clone());

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let title = entry
                    .title
                    .map(|t| decode_html_entities(&t.content).into_owned())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "No Title".to_string());

                // RSS plain links and Atom link.href both land in `links`.
                let link = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_else(|| "#".to_string());

                let description = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .map(|text| decode_html_entities(&text).into_owned())
                    .unwrap_or_default();

                let pub_date = entry.published.or(entry.updated).unwrap_or(fetched_at);

                // RSS <enclosure> and media:content both map into `media`.
                let enclosure = entry
                    .media
                    .iter()
                    .flat_map(|media| media.content.iter())
                    .find(|content| content.url.is_some());
                let enclosure_url = enclosure
                    .and_then(|content| content.url.as_ref())
                    .map(|u| u.to_string());
                let enclosure_media_type = enclosure
                    .and_then(|content| content.content_type.as_ref())
                    .map(|m| m.to_string());

                FeedItem {
                    title,
                    link,
                    description,
                    pub_date,
                    enclosure_url,
                    enclosure_media_type,
                    source: source_title.clone(),
                    category: source.category.clone(),
                }
            })
            .collect();

        Ok(items)
    }
}
