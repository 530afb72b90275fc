use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Outcome recorded with a cached value. A `NotFound` or `Error` entry is a
/// negative-cache record and is served like any other until it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    Success,
    NotFound,
    Error,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub state: EntryState,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Process-lifetime TTL key/value store. Stale entries are treated as
/// absent and evicted lazily when observed; entries are written whole under
/// the mutex, so concurrent writers race to a last-writer-wins outcome but
/// readers never see a torn entry.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Returns a fresh entry for `key`, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: &str, value: V, state: EntryState) {
        self.insert_with_ttl(key, value, state, self.default_ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: &str, value: V, state: EntryState, ttl: Duration) {
        let entry = CacheEntry {
            value,
            state,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
    }
}
