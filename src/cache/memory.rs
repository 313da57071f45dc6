// src/cache/memory.rs
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Cache;
use crate::error::CacheError;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe in-memory TTL map.
///
/// Expired entries are invisible to `get` immediately; they are physically removed by
/// [`MemoryCache::purge_expired`], which the sweeper task calls on a fixed period.
#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn get_now(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let guard = self.entries.read().expect("cache rwlock poisoned");
        guard
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, key: &str, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut guard = self.entries.write().expect("cache rwlock poisoned");
        guard.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) {
        let mut guard = self.entries.write().expect("cache rwlock poisoned");
        guard.remove(key);
    }

    /// Drops expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.write().expect("cache rwlock poisoned");
        let before = guard.len();
        guard.retain(|_, e| e.expires_at > now);
        before - guard.len()
    }

    /// Physical entry count, including expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<V> Cache<V> for MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.get_now(key)
    }

    async fn set(&self, key: &str, value: V) -> Result<(), CacheError> {
        self.insert(key, value, self.default_ttl);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().expect("cache rwlock poisoned").clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Periodic sweep, independent of individual TTLs. The task holds only a weak reference and
/// ends on its own once the cache is dropped.
pub fn spawn_sweeper<V>(cache: &Arc<MemoryCache<V>>, period: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let weak: Weak<MemoryCache<V>> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = weak.upgrade() else {
                break;
            };
            let removed = cache.purge_expired();
            if removed > 0 {
                counter!("feeds_cache_swept_total").increment(removed as u64);
                tracing::debug!(removed, "cache sweep");
            }
        }
    })
}
