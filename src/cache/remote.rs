// src/cache/remote.rs
//! Redis-backed cache for multi-instance deployments.
//!
//! Values are stored as JSON text under `<namespace>:<key>` and expire through Redis' own
//! per-key TTL (`SET .. PX`). `clear` walks only this namespace with `SCAN MATCH`.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};

use super::Cache;
use crate::error::CacheError;

const SCAN_BATCH: usize = 200;

pub struct RedisCache<V> {
    conn: ConnectionManager,
    namespace: String,
    default_ttl: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<V> RedisCache<V> {
    /// Opens a managed connection and pings it; any failure here is `CacheError::Unavailable`
    /// so wiring can fall back to the process-local backend.
    pub async fn connect(
        url: &str,
        namespace: &str,
        default_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::Unavailable)?;
        // One plain probe first: the manager retries with backoff before giving up.
        let mut probe = client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::Unavailable)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut probe)
            .await
            .map_err(CacheError::Unavailable)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(CacheError::Unavailable)?;

        tracing::info!(namespace, "connected to redis cache");
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            default_ttl,
            _value: PhantomData,
        })
    }

    fn key(&self, key: &str) -> String {
        namespaced_key(&self.namespace, key)
    }
}

fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// `SCAN MATCH` pattern covering exactly the keys under `namespace`; glob metacharacters in the
/// namespace itself are escaped.
fn namespace_pattern(namespace: &str) -> String {
    let mut out = String::with_capacity(namespace.len() + 2);
    for ch in namespace.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push_str(":*");
    out
}

#[async_trait]
impl<V> Cache<V> for RedisCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, key, "redis GET failed, treating as miss");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, key, "undecodable cache value, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: V) -> Result<(), CacheError> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&value)?;
        // PX 0 is rejected by Redis.
        let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(payload)
            .arg("PX")
            .arg(ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pattern = namespace_pattern(&self.namespace);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: usize = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(namespace = %self.namespace, removed, "cleared redis namespace");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_the_namespace_prefix() {
        assert_eq!(namespaced_key("feeds:snapshot", "snapshot"), "feeds:snapshot:snapshot");
        assert_eq!(namespaced_key("feeds", ""), "feeds:");
    }

    #[test]
    fn clear_pattern_is_limited_to_the_namespace() {
        assert_eq!(namespace_pattern("feeds:ratelimit"), "feeds:ratelimit:*");
        let key = namespaced_key("feeds:ratelimit", "host:a.example");
        assert!(key.starts_with(namespace_pattern("feeds:ratelimit").trim_end_matches('*')));
    }

    #[test]
    fn glob_characters_in_namespace_are_escaped() {
        assert_eq!(namespace_pattern("app*"), "app\\*:*");
        assert_eq!(namespace_pattern("a?[b]"), "a\\?\\[b\\]:*");
        assert_eq!(namespace_pattern(r"x\y"), r"x\\y:*");
    }
}
