//! In-memory TTL cache for analysis results.
//!
//! Entries expire `ttl` after insertion and are dropped lazily on read or by
//! [`ResultCache::sweep_expired`]. When the cache is full, the oldest
//! insertion is evicted before a new key goes in. Content-hash aliases let
//! two URLs that serve identical text share one entry.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use super::hash::content_key;

/// Point-in-time counters for a [`ResultCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub max_size: usize,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
    aliases: Vec<String>,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion sequence to key; the first entry is the eviction victim.
    order: BTreeMap<u64, String>,
    /// Content key to primary key.
    aliases: HashMap<String, String>,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn detach(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        for alias in &entry.aliases {
            self.aliases.remove(alias);
        }
        Some(entry)
    }

    fn evict_oldest(&mut self) {
        let Some((_, key)) = self.order.pop_first() else { return };
        if let Some(entry) = self.entries.remove(&key) {
            for alias in &entry.aliases {
                self.aliases.remove(alias);
            }
        }
        tracing::debug!(%key, "Evicted oldest cache entry");
    }

    fn resolve<'a>(&'a self, key: &'a str) -> &'a str {
        self.aliases.get(key).map(String::as_str).unwrap_or(key)
    }
}

/// TTL and size bounded result cache.
#[derive(Debug)]
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    max_size: usize,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                aliases: HashMap::new(),
                next_seq: 0,
            }),
            ttl,
            max_size: max_size.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry. Expired entries are removed and reported as a miss.
    ///
    /// Content keys (`sha256:...`) resolve through their alias.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let primary = inner.resolve(key).to_string();

        let expired = match inner.entries.get(&primary) {
            None => return None,
            Some(entry) => entry.expires_at <= Instant::now(),
        };

        if expired {
            inner.detach(&primary);
            tracing::debug!(key = %primary, "Cache entry expired");
            return None;
        }

        tracing::debug!(key = %primary, "Cache hit");
        inner.entries.get(&primary).map(|entry| entry.value.clone())
    }

    /// Look up the entry registered for identical page content.
    pub async fn get_by_content(&self, content: &str) -> Option<V> {
        self.get(&content_key(content)).await
    }

    /// Insert or replace `key`.
    ///
    /// Replacing an existing key makes it the newest insertion and drops its
    /// aliases. Inserting a new key into a full cache evicts the oldest one.
    pub async fn set(&self, key: &str, value: V) {
        let mut inner = self.inner.lock().await;
        self.insert_locked(&mut inner, key, value);
    }

    /// Insert `key` and register the content key of `content` as an alias.
    ///
    /// Returns the content key.
    pub async fn set_with_content_hash(&self, key: &str, value: V, content: &str) -> String {
        let alias = content_key(content);
        let mut inner = self.inner.lock().await;
        self.insert_locked(&mut inner, key, value);

        if let Some(previous) = inner.aliases.insert(alias.clone(), key.to_string())
            && previous != key
            && let Some(entry) = inner.entries.get_mut(&previous)
        {
            entry.aliases.retain(|a| a != &alias);
        }
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.aliases.push(alias.clone());
        }
        alias
    }

    fn insert_locked(&self, inner: &mut Inner<V>, key: &str, value: V) {
        if inner.detach(key).is_none() && inner.entries.len() >= self.max_size {
            inner.evict_oldest();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
            seq,
            aliases: Vec::new(),
        };
        inner.entries.insert(key.to_string(), entry);
    }

    /// Remove an entry and its aliases. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let primary = inner.resolve(key).to_string();
        inner.detach(&primary).is_some()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
        inner.aliases.clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.detach(key);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Swept expired cache entries");
        }
        expired.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Unexpired values, oldest insertion first.
    pub async fn live_values(&self) -> Vec<V> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .order
            .values()
            .filter_map(|key| inner.entries.get(key))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Counters without mutating the cache.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let total = inner.entries.len();
        let valid = inner.entries.values().filter(|entry| entry.expires_at > now).count();
        CacheStats { total, valid, expired: total - valid, max_size: self.max_size }
    }
}
