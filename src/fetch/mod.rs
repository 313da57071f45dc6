// src/fetch/mod.rs
//! Source fetchers: one per configured source, each producing a normalized batch or failing.
//!
//! A fetch is all-or-nothing: a body that fails to download or parse yields an error and no
//! items. Every network request is preceded by the rate limiter's `wait` for the host.

pub mod context;
pub mod reddit;
pub mod rss;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};

use crate::config::HttpConfig;
use crate::model::{host_of, FeedItem, FeedKind, SourceInfo};
use crate::ratelimit::DynRateLimiter;

pub use context::FetchContext;
pub use reddit::RedditFetcher;
pub use rss::RssFetcher;

/// Summaries are cut to this many characters.
pub(crate) const SUMMARY_MAX_CHARS: usize = 300;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Pull and normalize one batch. Must honour `ctx` cancellation and deadline.
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<FeedItem>>;

    fn source(&self) -> &SourceInfo;
}

pub type DynFetcher = Arc<dyn Fetcher>;

/// Where a fetcher reads its raw body from.
pub enum Origin {
    /// In-memory body (tests, offline demos); never touches the network or the limiter.
    Fixture(String),
    Http {
        client: reqwest::Client,
        limiter: DynRateLimiter,
    },
}

impl Origin {
    pub(crate) async fn load(&self, url: &str, ctx: &FetchContext) -> Result<String> {
        match self {
            Origin::Fixture(body) => Ok(body.clone()),
            Origin::Http { client, limiter } => {
                let host = host_of(url).ok_or_else(|| anyhow!("invalid feed url: {url}"))?;
                ctx.run(async {
                    limiter.wait(&host).await;
                    let resp = client
                        .get(url)
                        .send()
                        .await
                        .with_context(|| format!("GET {url}"))?;
                    let status = resp.status();
                    if !status.is_success() {
                        bail!("GET {url}: HTTP {status}");
                    }
                    resp.text().await.context("reading response body")
                })
                .await
            }
        }
    }
}

/// Parse telemetry shared by both fetcher kinds.
pub(crate) fn record_batch(source_id: &str, started: std::time::Instant, items: usize) {
    let ms = started.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feeds_fetch_ms", "source" => source_id.to_string()).record(ms);
    counter!("feeds_items_fetched_total").increment(items as u64);
}

pub fn build_http_client(cfg: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .context("building http client")
}

/// One HTTP fetcher per source, in configuration order (disabled sources included; the
/// aggregator skips them at refresh time).
pub fn build_fetchers(
    sources: &[SourceInfo],
    client: &reqwest::Client,
    limiter: &DynRateLimiter,
) -> Vec<DynFetcher> {
    sources
        .iter()
        .map(|s| -> DynFetcher {
            match s.feed_kind {
                FeedKind::Rss => Arc::new(RssFetcher::from_http(
                    s.clone(),
                    client.clone(),
                    limiter.clone(),
                )),
                FeedKind::Reddit => Arc::new(RedditFetcher::from_http(
                    s.clone(),
                    client.clone(),
                    limiter.clone(),
                )),
            }
        })
        .collect()
}
