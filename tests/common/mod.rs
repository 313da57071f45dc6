// tests/common/mod.rs
//
// Shared builders for integration tests: fixture-backed fetchers and a scripted fetcher whose
// delay and failure can be controlled from the test.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_aggregator::aggregator::Aggregator;
use feed_aggregator::cache::memory_cache;
use feed_aggregator::config::{CacheConfig, EngineConfig};
use feed_aggregator::fetch::{DynFetcher, FetchContext, Fetcher, RedditFetcher, RssFetcher};
use feed_aggregator::model::{FeedItem, FeedKind, SourceCategory, SourceInfo};
use feed_aggregator::tagger::Tagger;

pub const DRONEDJ_RSS: &str = include_str!("../fixtures/dronedj_rss.xml");
pub const DRONEXL_ATOM: &str = include_str!("../fixtures/dronexl_atom.xml");
pub const REDDIT_FPV: &str = include_str!("../fixtures/reddit_fpv.json");

pub fn source(id: &str, category: SourceCategory, kind: FeedKind) -> SourceInfo {
    SourceInfo {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        feed_url: format!("https://{id}.example/feed"),
        source_type: category,
        feed_kind: kind,
        enabled: true,
    }
}

/// dronedj (RSS), dronexl (Atom), r-fpv (Reddit), in that order.
pub fn fixture_fetchers() -> Vec<DynFetcher> {
    vec![
        Arc::new(RssFetcher::from_fixture(
            source("dronedj", SourceCategory::News, FeedKind::Rss),
            DRONEDJ_RSS,
        )),
        Arc::new(RssFetcher::from_fixture(
            source("dronexl", SourceCategory::News, FeedKind::Rss),
            DRONEXL_ATOM,
        )),
        Arc::new(RedditFetcher::from_fixture(
            source("r-fpv", SourceCategory::Community, FeedKind::Reddit),
            REDDIT_FPV,
        )),
    ]
}

pub fn aggregator_with(fetchers: Vec<DynFetcher>, cfg: EngineConfig) -> Aggregator {
    Aggregator::new(
        fetchers,
        memory_cache(&CacheConfig::default()),
        Arc::new(Tagger::default()),
        cfg,
    )
}

pub fn fixture_aggregator() -> Aggregator {
    aggregator_with(fixture_fetchers(), EngineConfig::default())
}

/// Fetcher returning one item per title after `delay`, or failing while `failing` is set.
pub struct Scripted {
    source: SourceInfo,
    titles: Vec<String>,
    delay: Duration,
    failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl Scripted {
    pub fn new(id: &str, titles: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source: source(id, SourceCategory::News, FeedKind::Rss),
            titles: titles.iter().map(|t| t.to_string()).collect(),
            delay,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        let s = Self::new(id, &[], Duration::ZERO);
        s.set_failing(true);
        s
    }

    pub fn set_failing(&self, v: bool) {
        self.failing.store(v, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for Scripted {
    async fn fetch(&self, _ctx: &FetchContext) -> anyhow::Result<Vec<FeedItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{} unreachable", self.source.id);
        }
        Ok(self
            .titles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let url = format!("https://{}.example/items/{i}", self.source.id);
                FeedItem::new(&self.source, t.as_str(), url)
            })
            .collect())
    }

    fn source(&self) -> &SourceInfo {
        &self.source
    }
}
