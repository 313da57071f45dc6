// src/bootstrap.rs
//! Builds a ready-to-run [`Aggregator`] from an [`AppConfig`].

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::aggregator::Aggregator;
use crate::cache::{build_cache_or_memory, DynCache};
use crate::config::AppConfig;
use crate::fetch::{build_fetchers, build_http_client};
use crate::model::Snapshot;
use crate::ratelimit::{DistributedRateLimiter, DynRateLimiter, HostRateLimiter};
use crate::tagger::Tagger;

pub async fn build_rate_limiter(cfg: &AppConfig) -> DynRateLimiter {
    let interval = cfg.rate_limit.min_interval();
    if cfg.rate_limit.distributed {
        let store: DynCache<u8> = build_cache_or_memory(&cfg.cache, "ratelimit").await;
        info!(backend = store.backend_name(), ?interval, "distributed rate limiter");
        Arc::new(DistributedRateLimiter::new(interval, store))
    } else {
        Arc::new(HostRateLimiter::new(interval))
    }
}

pub fn build_tagger(cfg: &AppConfig) -> Tagger {
    Tagger::with_overrides(cfg.tags.clone())
}

/// HTTP client, cache (Redis falls back to memory), limiter, tagger and one fetcher per source.
pub async fn build_aggregator(cfg: &AppConfig) -> Result<Arc<Aggregator>> {
    let client = build_http_client(&cfg.http)?;
    let limiter = build_rate_limiter(cfg).await;
    let cache: DynCache<Arc<Snapshot>> = build_cache_or_memory(&cfg.cache, "snapshot").await;
    let tagger = Arc::new(build_tagger(cfg));
    let fetchers = build_fetchers(&cfg.sources, &client, &limiter);

    info!(
        sources = cfg.sources.len(),
        enabled = cfg.sources.iter().filter(|s| s.enabled).count(),
        cache = cache.backend_name(),
        "aggregator ready"
    );

    Ok(Arc::new(Aggregator::new(
        fetchers,
        cache,
        tagger,
        cfg.engine.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheBackend;

    #[tokio::test]
    async fn builtin_config_wires_every_source() {
        let cfg = AppConfig::builtin();
        let agg = build_aggregator(&cfg).await.unwrap();
        let ids: Vec<_> = agg.get_sources().into_iter().map(|s| s.id).collect();
        let expected: Vec<_> = cfg.sources.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_for_cache_and_limiter() {
        let mut cfg = AppConfig::builtin();
        cfg.cache.backend = CacheBackend::Redis;
        cfg.cache.redis_url = Some("redis://127.0.0.1:1/".into());
        cfg.rate_limit.distributed = true;
        let agg = build_aggregator(&cfg).await.unwrap();
        assert!(agg.snapshot().await.is_none());
    }

    #[test]
    fn tag_overrides_replace_builtin_categories() {
        let mut cfg = AppConfig::builtin();
        cfg.tags.insert("fpv".into(), vec!["freestyle".into()]);
        let tagger = build_tagger(&cfg);
        let rules = tagger.rules();
        assert_eq!(rules["fpv"].len(), 1);
        assert!(rules.contains_key("racing"));
    }
}
