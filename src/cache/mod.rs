// src/cache/mod.rs
//! Time-boxed key/value cache behind one contract, with a process-local and a Redis backend.
//!
//! The backend is picked once at startup by [`build_cache`] and stays fixed for the process
//! lifetime. The aggregator stores its snapshot here; the distributed rate limiter stores its
//! sentinel keys here.

pub mod memory;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;

pub use memory::{spawn_sweeper, MemoryCache};
pub use remote::RedisCache;

#[async_trait]
pub trait Cache<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Returns the value if present and not expired. Backend errors are logged and read as a miss.
    async fn get(&self, key: &str) -> Option<V>;

    /// Stores `value` with the backend's default TTL.
    async fn set(&self, key: &str, value: V) -> Result<(), CacheError>;

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every key owned by this cache (never anything outside its namespace).
    async fn clear(&self) -> Result<(), CacheError>;

    fn backend_name(&self) -> &'static str;
}

pub type DynCache<V> = Arc<dyn Cache<V>>;

/// Builds the configured backend. `scope` is appended to the configured namespace so that
/// independent users (snapshot, rate limiter) never see each other's keys.
///
/// A Redis connection failure is returned as-is; falling back is the caller's decision.
pub async fn build_cache<V>(cfg: &CacheConfig, scope: &str) -> Result<DynCache<V>, CacheError>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let default_ttl = Duration::from_secs(cfg.default_ttl_secs);
    match cfg.backend {
        CacheBackend::Memory => Ok(memory_cache(cfg)),
        CacheBackend::Redis => {
            let url = cfg.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379");
            let namespace = format!("{}:{}", cfg.namespace, scope);
            let cache = RedisCache::connect(url, &namespace, default_ttl).await?;
            Ok(Arc::new(cache))
        }
    }
}

/// Process-local cache with its background sweeper already running.
pub fn memory_cache<V>(cfg: &CacheConfig) -> DynCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(cfg.default_ttl_secs)));
    spawn_sweeper(&cache, Duration::from_secs(cfg.sweep_interval_secs.max(1)));
    cache
}

/// [`build_cache`], falling back to the process-local backend when Redis is unreachable.
pub async fn build_cache_or_memory<V>(cfg: &CacheConfig, scope: &str) -> DynCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match build_cache(cfg, scope).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, scope, "shared cache unavailable, using process-local cache");
            memory_cache(cfg)
        }
    }
}
