use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{EntryState, TtlCache};
use crate::error::SourceError;
use crate::fetcher::Fetcher;
use crate::model::{FeedItem, FeedSource};
use crate::normalizer::Normalizer;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Deadline for the whole aggregate call.
    pub timeout: Duration,
    /// Optional cap on concurrent source fetches.
    pub max_concurrency: Option<usize>,
    /// Freshness window for cached aggregate results.
    pub cache_ttl: Duration,
}

/// The settled outcome of one aggregate call. Errors alongside items is a
/// normal partial-success state, not a failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateResult {
    pub items: Vec<FeedItem>,
    pub errors: Vec<SourceError>,
}

/// Fans out one fetch task per source, merges normalized items, collects
/// per-source errors, sorts by publication date, and caches the settled
/// result keyed by the sorted-joined source URLs.
pub struct Aggregator {
    fetcher: Arc<Fetcher>,
    normalizer: Normalizer,
    results: TtlCache<AggregateResult>,
    timeout: Duration,
    permits: Option<Arc<Semaphore>>,
}

impl Aggregator {
    pub fn new(fetcher: Arc<Fetcher>, normalizer: Normalizer, config: AggregatorConfig) -> Self {
        Self {
            fetcher,
            normalizer,
            results: TtlCache::new(config.cache_ttl),
            timeout: config.timeout,
            permits: config
                .max_concurrency
                .map(|cap| Arc::new(Semaphore::new(cap))),
        }
    }

    /// Fetch and merge all sources. Always settles: one bad feed never
    /// suppresses the others, and sources still in flight at the deadline
    /// are reported as timed out without discarding completed ones.
    pub async fn aggregate(&self, sources: Vec<FeedSource>) -> AggregateResult {
        if sources.is_empty() {
            return AggregateResult::default();
        }

        let key = cache_key(&sources);
        if let Some(entry) = self.results.get(&key).await {
            debug!(key, "aggregate cache hit");
            return entry.value;
        }

        let deadline = Instant::now() + self.timeout;
        let mut tasks = JoinSet::new();
        for (index, source) in sources.iter().cloned().enumerate() {
            let fetcher = self.fetcher.clone();
            let normalizer = self.normalizer.clone();
            let permits = self.permits.clone();
            tasks.spawn(async move {
                let _permit = match permits {
                    Some(semaphore) => {
                        Some(semaphore.acquire_owned().await.expect("semaphore closed"))
                    }
                    None => None,
                };
                let outcome = fetch_source(&fetcher, &normalizer, &source).await;
                (index, outcome)
            });
        }

        let mut items = Vec::new();
        let mut errors = Vec::new();
        let mut settled = HashSet::new();

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => {
                    settled.insert(index);
                    match outcome {
                        Ok(mut fetched) => items.append(&mut fetched),
                        Err(error) => errors.push(error),
                    }
                }
                Ok(Some(Err(join_error))) => {
                    warn!(error = %join_error, "source task failed to join");
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    for (index, source) in sources.iter().enumerate() {
                        if !settled.contains(&index) {
                            warn!(url = %source.url, "source abandoned at deadline");
                            errors.push(SourceError::timed_out(&source.url));
                        }
                    }
                    break;
                }
            }
        }

        items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        info!(
            sources = sources.len(),
            items = items.len(),
            errors = errors.len(),
            "aggregate settled"
        );

        let result = AggregateResult { items, errors };
        let state = if result.errors.len() == sources.len() {
            EntryState::Error
        } else {
            EntryState::Success
        };
        self.results.insert(&key, result.clone(), state).await;

        result
    }
}

async fn fetch_source(
    fetcher: &Fetcher,
    normalizer: &Normalizer,
    source: &FeedSource,
) -> Result<Vec<FeedItem>, SourceError> {
    let body = fetcher
        .fetch_feed(&source.url)
        .await
        .map_err(|error| SourceError::new(&source.url, &error))?;

    let items = normalizer
        .normalize(&body, source, Utc::now())
        .map_err(|error| SourceError::new(&source.url, &error))?;

    debug!(url = %source.url, count = items.len(), "source fetched");
    Ok(items)
}

/// Cache key for a source set: URLs sorted then joined, so the same set in
/// any order hits the same entry.
fn cache_key(sources: &[FeedSource]) -> String {
    let mut urls: Vec<&str> = sources.iter().map(|s| s.url.as_str()).collect();
    urls.sort_unstable();
    urls.join(",")
}
