//! Pluggable TTL key-value cache.
//!
//! The cache is an optimisation only: a missing or failing cache degrades to
//! always-fetch and never surfaces an error to the workflow.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// TTL key-value store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a live value, `None` on miss or expiry.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` for `ttl`. Write failures are the implementation's to
    /// log; callers ignore them.
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

/// Cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
}

struct Entry {
    value: String,
    /// `None` when `ttl` is too large to represent as a deadline.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local cache with per-entry expiry. Expired entries are dropped
/// on every `set` and when a `get` lands on one.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop expired entries.
    pub async fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.lock().await.retain(|_, e| e.is_live(now));
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.is_live(Instant::now()) {
            return Some(entry.value.clone());
        }
        entries.remove(key);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_cache_always_misses() {
        let cache = NoCache;
        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_on_set() {
        let cache = InMemoryCache::new();
        for i in 0..100 {
            cache.set(&format!("short:{i}"), "v".into(), Duration::from_secs(5)).await;
        }
        cache.set("long", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 101);

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("fresh", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("long").await.as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_keeps_live_entries() {
        let cache = InMemoryCache::new();
        cache.set("a", "1".into(), Duration::from_secs(5)).await;
        cache.set("b", "2".into(), Duration::from_secs(50)).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        cache.evict_expired().await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.get("b").await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), Duration::MAX).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }
}
