// src/aggregator/mod.rs
//! Refresh orchestration and the read path over the cached snapshot.
//!
//! A refresh fans out one task per enabled source, waits for all of them (or for the context to
//! end), merges the successful batches in configuration order, and writes a fresh [`Snapshot`].
//! Reads never touch the network: they filter whatever snapshot the cache holds.

pub mod merge;
pub mod query;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::DynCache;
use crate::config::EngineConfig;
use crate::error::{CacheError, RefreshError, SourceFailure};
use crate::fetch::{DynFetcher, FetchContext};
use crate::model::{FeedItem, FeedPage, FilterParams, Snapshot, SourceCategory, SourceInfo};
use crate::tagger::Tagger;

use query::PageLimits;

/// Cache key of the merged snapshot.
pub const SNAPSHOT_KEY: &str = "snapshot";

static METRICS_DESCRIBED: OnceCell<()> = OnceCell::new();

fn ensure_metrics_described() {
    METRICS_DESCRIBED.get_or_init(|| {
        describe_counter!("feeds_refresh_total", "Completed refresh cycles (full or partial)");
        describe_counter!("feeds_refresh_failed_total", "Refresh cycles that stored nothing");
        describe_counter!("feeds_source_errors_total", "Per-source fetch failures");
        describe_counter!("feeds_items_fetched_total", "Items parsed from source bodies");
        describe_counter!("feeds_duplicates_removed_total", "Items dropped by dedup");
        describe_gauge!("feeds_snapshot_items", "Items in the current snapshot");
        describe_gauge!("feeds_last_refresh_ts", "Unix time of the last stored snapshot");
        describe_histogram!("feeds_fetch_ms", "Per-source parse time in milliseconds");
    });
}

/// Where the engine is in its refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Fetching,
    Merging,
    Cached,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Fetching,
            2 => Phase::Merging,
            3 => Phase::Cached,
            _ => Phase::Idle,
        }
    }
}

/// Outcome of the last attempt for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub ok: bool,
    pub items: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub checked_at: DateTime<Utc>,
}

/// Summary of a refresh that stored a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub fetched_at: DateTime<Utc>,
    pub sources_ok: usize,
    /// Sources that failed; empty on a full success.
    pub failures: Vec<SourceFailure>,
    pub items_fetched: usize,
    pub items_kept: usize,
    pub duplicates_removed: usize,
    pub duration_ms: u64,
}

impl RefreshReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

struct FetchOutcome {
    source_id: String,
    result: Result<Vec<FeedItem>, String>,
    took: Duration,
}

pub struct Aggregator {
    fetchers: Vec<DynFetcher>,
    sources: Vec<SourceInfo>,
    categories: HashMap<String, SourceCategory>,
    cache: DynCache<Arc<Snapshot>>,
    tagger: Arc<Tagger>,
    cfg: EngineConfig,
    refresh_lock: Mutex<()>,
    phase: AtomicU8,
    status: RwLock<HashMap<String, SourceStatus>>,
}

impl Aggregator {
    /// Sources are taken from the fetchers, in the order given; that order decides which
    /// duplicate survives a merge.
    pub fn new(
        fetchers: Vec<DynFetcher>,
        cache: DynCache<Arc<Snapshot>>,
        tagger: Arc<Tagger>,
        cfg: EngineConfig,
    ) -> Self {
        ensure_metrics_described();
        let sources: Vec<SourceInfo> = fetchers.iter().map(|f| f.source().clone()).collect();
        let categories = sources
            .iter()
            .map(|s| (s.id.clone(), s.source_type))
            .collect();
        Self {
            fetchers,
            sources,
            categories,
            cache,
            tagger,
            cfg,
            refresh_lock: Mutex::new(()),
            phase: AtomicU8::new(Phase::Idle as u8),
            status: RwLock::new(HashMap::new()),
        }
    }

    /// Runs a refresh, waiting for any refresh already in flight to finish first.
    pub async fn refresh(&self, ctx: &FetchContext) -> Result<RefreshReport, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(ctx).await
    }

    /// Like [`refresh`](Self::refresh) but fails with [`RefreshError::InProgress`] instead of
    /// queueing behind a running cycle.
    pub async fn try_refresh(&self, ctx: &FetchContext) -> Result<RefreshReport, RefreshError> {
        let _guard = self
            .refresh_lock
            .try_lock()
            .map_err(|_| RefreshError::InProgress)?;
        self.refresh_locked(ctx).await
    }

    async fn refresh_locked(&self, ctx: &FetchContext) -> Result<RefreshReport, RefreshError> {
        let enabled: Vec<DynFetcher> = self
            .fetchers
            .iter()
            .filter(|f| f.source().enabled)
            .cloned()
            .collect();
        if enabled.is_empty() {
            warn!("refresh requested with no enabled sources");
            return Err(RefreshError::NoEnabledSources);
        }

        let ctx = ctx.clone().or_timeout(self.cfg.refresh_timeout());
        let started = Instant::now();
        self.set_phase(Phase::Fetching);
        info!(sources = enabled.len(), "refresh started");

        let outcomes = fetch_all(&enabled, &ctx).await;

        self.set_phase(Phase::Merging);
        self.record_status(&outcomes);

        let mut failures = Vec::new();
        let mut batches = Vec::new();
        for o in outcomes {
            match o.result {
                Ok(items) => batches.push(items),
                Err(error) => {
                    counter!("feeds_source_errors_total", "source" => o.source_id.clone())
                        .increment(1);
                    warn!(source = %o.source_id, %error, "source failed");
                    failures.push(SourceFailure {
                        source_id: o.source_id,
                        error,
                    });
                }
            }
        }

        if batches.is_empty() {
            counter!("feeds_refresh_failed_total").increment(1);
            self.settle_phase().await;
            warn!(failed = failures.len(), "refresh stored nothing; previous snapshot kept");
            return Err(RefreshError::AllSourcesFailed { failures });
        }

        let sources_ok = batches.len();
        let items_fetched: usize = batches.iter().map(Vec::len).sum();
        let (items, duplicates_removed) = merge::merge_batches(batches, &self.tagger);

        let fetched_at = Utc::now();
        let snapshot = Arc::new(Snapshot {
            items,
            fetched_at,
            source_count: sources_ok,
        });
        let items_kept = snapshot.items.len();

        if let Err(e) = self
            .cache
            .set_with_ttl(SNAPSHOT_KEY, snapshot, self.cfg.snapshot_ttl())
            .await
        {
            counter!("feeds_refresh_failed_total").increment(1);
            self.settle_phase().await;
            warn!(error = %e, "storing snapshot failed");
            return Err(e.into());
        }

        self.set_phase(Phase::Cached);
        counter!("feeds_refresh_total").increment(1);
        counter!("feeds_duplicates_removed_total").increment(duplicates_removed as u64);
        gauge!("feeds_snapshot_items").set(items_kept as f64);
        gauge!("feeds_last_refresh_ts").set(fetched_at.timestamp() as f64);

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            sources_ok,
            failed = failures.len(),
            items_fetched,
            items_kept,
            duplicates_removed,
            duration_ms,
            "refresh finished"
        );

        Ok(RefreshReport {
            fetched_at,
            sources_ok,
            failures,
            items_fetched,
            items_kept,
            duplicates_removed,
            duration_ms,
        })
    }

    /// After a failed cycle: back to `Cached` if an older snapshot is still served, else `Idle`.
    async fn settle_phase(&self) {
        let phase = if self.cache.get(SNAPSHOT_KEY).await.is_some() {
            Phase::Cached
        } else {
            Phase::Idle
        };
        self.set_phase(phase);
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn record_status(&self, outcomes: &[FetchOutcome]) {
        let now = Utc::now();
        let mut map = self.status.write().expect("status rwlock poisoned");
        for o in outcomes {
            let (ok, items, error) = match &o.result {
                Ok(items) => (true, items.len(), None),
                Err(e) => (false, 0, Some(e.clone())),
            };
            map.insert(
                o.source_id.clone(),
                SourceStatus {
                    source_id: o.source_id.clone(),
                    ok,
                    items,
                    error,
                    duration_ms: o.took.as_millis() as u64,
                    checked_at: now,
                },
            );
        }
    }

    /// Filtered, sorted page of the cached snapshot. An empty page when nothing is cached.
    pub async fn get_items(&self, params: &FilterParams) -> FeedPage {
        let Some(snapshot) = self.cache.get(SNAPSHOT_KEY).await else {
            debug!("no snapshot cached; returning empty page");
            return FeedPage::empty();
        };
        let limits = PageLimits {
            default_limit: self.cfg.default_limit,
            max_limit: self.cfg.max_limit,
        };
        let (items, total_count) = query::apply(&snapshot.items, params, &self.categories, limits);
        FeedPage {
            items,
            total_count,
            fetched_at: Some(snapshot.fetched_at),
            source_count: snapshot.source_count,
        }
    }

    /// The configured sources in order, disabled ones included.
    pub fn get_sources(&self) -> Vec<SourceInfo> {
        self.sources.clone()
    }

    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.cache.get(SNAPSHOT_KEY).await
    }

    /// Last attempt per source, in configuration order. Sources never attempted are omitted.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let map = self.status.read().expect("status rwlock poisoned");
        self.sources
            .iter()
            .filter_map(|s| map.get(&s.id).cloned())
            .collect()
    }

    /// Drops the cached snapshot; reads return empty pages until the next refresh.
    pub async fn invalidate(&self) -> Result<(), CacheError> {
        self.cache.delete(SNAPSHOT_KEY).await?;
        self.set_phase(Phase::Idle);
        info!("snapshot invalidated");
        Ok(())
    }

    pub fn tagger(&self) -> &Arc<Tagger> {
        &self.tagger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }
}

/// Fetches every source concurrently. Results come back in `fetchers` order; a source still
/// running when `ctx` ends is aborted and reported as failed.
async fn fetch_all(fetchers: &[DynFetcher], ctx: &FetchContext) -> Vec<FetchOutcome> {
    let started = Instant::now();
    let mut set = JoinSet::new();
    for (slot, fetcher) in fetchers.iter().enumerate() {
        let fetcher = fetcher.clone();
        let ctx = ctx.clone();
        set.spawn(async move {
            let t0 = Instant::now();
            let res = ctx.run(fetcher.fetch(&ctx)).await;
            (slot, res, t0.elapsed())
        });
    }

    let mut done: Vec<Option<(anyhow::Result<Vec<FeedItem>>, Duration)>> =
        fetchers.iter().map(|_| None).collect();

    loop {
        tokio::select! {
            biased;
            joined = set.join_next() => match joined {
                Some(Ok((slot, res, took))) => done[slot] = Some((res, took)),
                Some(Err(e)) => warn!(error = %e, "fetch task did not complete"),
                None => break,
            },
            _ = ctx.done() => {
                set.abort_all();
                warn!(pending = set.len(), "refresh context ended; finalizing with completed sources");
                break;
            }
        }
    }

    let cut_short = if ctx.cancel_token().is_cancelled() {
        "cancelled"
    } else {
        "deadline exceeded"
    };

    fetchers
        .iter()
        .zip(done)
        .map(|(f, outcome)| {
            let source_id = f.source().id.clone();
            match outcome {
                Some((Ok(items), took)) => FetchOutcome {
                    source_id,
                    result: Ok(items),
                    took,
                },
                Some((Err(e), took)) => FetchOutcome {
                    source_id,
                    result: Err(format!("{e:#}")),
                    took,
                },
                None => FetchOutcome {
                    source_id,
                    result: Err(cut_short.to_string()),
                    took: started.elapsed(),
                },
            }
        })
        .collect()
}
