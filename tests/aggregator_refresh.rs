// tests/aggregator_refresh.rs
//
// Refresh-cycle behaviour: partial failure, stale snapshot on total failure, cross-source dedup,
// serialization of concurrent refreshes, cancellation and the refresh deadline.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{aggregator_with, fixture_aggregator, source, Scripted};
use feed_aggregator::config::EngineConfig;
use feed_aggregator::fetch::{DynFetcher, FetchContext, RssFetcher};
use feed_aggregator::model::{FeedKind, SourceCategory};
use feed_aggregator::{FilterParams, Phase, RefreshError};
use tokio_util::sync::CancellationToken;

fn all() -> FilterParams {
    FilterParams {
        limit: Some(100),
        ..Default::default()
    }
}

#[tokio::test]
async fn fixtures_merge_into_one_snapshot() {
    let agg = fixture_aggregator();
    let report = agg.refresh(&FetchContext::new()).await.expect("refresh ok");

    assert_eq!(report.sources_ok, 3);
    assert!(report.failures.is_empty());
    assert_eq!(report.items_fetched, 7);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.items_kept, 6);

    let page = agg.get_items(&all()).await;
    assert_eq!(page.total_count, 6);
    assert_eq!(page.source_count, 3);
    assert_eq!(page.fetched_at, Some(report.fetched_at));
    assert_eq!(agg.phase(), Phase::Cached);
}

#[tokio::test]
async fn cross_source_title_duplicate_keeps_first_configured_source() {
    let agg = fixture_aggregator();
    agg.refresh(&FetchContext::new()).await.unwrap();

    let page = agg
        .get_items(&FilterParams {
            query: Some("drone x launch".into()),
            ..all()
        })
        .await;
    assert_eq!(page.total_count, 1, "duplicate headline must collapse");
    let item = &page.items[0];
    assert_eq!(item.source_id, "dronedj");
    assert_eq!(item.title, "Drone X Launch");
    // tags of the dropped Atom entry are unioned into the survivor
    assert!(item.tags.contains("launch"));
    assert!(item.tags.contains("hardware"));
}

fn rss_with_title(id: &str, title: &str) -> DynFetcher {
    let xml = format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>{id}</title>
<item><title>{title}</title><link>https://{id}.example/drone-x</link></item>
</channel></rss>"#
    );
    Arc::new(RssFetcher::from_fixture(
        source(id, SourceCategory::News, FeedKind::Rss),
        &xml,
    ))
}

#[tokio::test]
async fn entity_encoded_publisher_suffix_still_dedups() {
    let fetchers = vec![
        rss_with_title("first", "Drone X Launch"),
        rss_with_title("second", "DRONE X LAUNCH &mdash; official"),
    ];
    let agg = aggregator_with(fetchers, EngineConfig::default());
    let report = agg.refresh(&FetchContext::new()).await.unwrap();

    assert_eq!(report.items_fetched, 2);
    assert_eq!(report.duplicates_removed, 1);
    let page = agg.get_items(&all()).await;
    assert_eq!(page.total_count, 1);
    assert_eq!(page.items[0].source_id, "first");
    assert_eq!(page.items[0].title, "Drone X Launch");
}

#[tokio::test]
async fn ids_are_unique_and_inferred_tags_applied() {
    let agg = fixture_aggregator();
    agg.refresh(&FetchContext::new()).await.unwrap();
    let items = agg.get_items(&all()).await.items;

    let mut ids: Vec<_> = items.iter().map(|i| i.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), items.len());

    let faa = items.iter().find(|i| i.title.starts_with("FAA")).unwrap();
    assert!(faa.tags.contains("regulation"));
    let whoop = items.iter().find(|i| i.title.contains("tinywhoop")).unwrap();
    assert!(whoop.tags.contains("fpv"));
    assert!(whoop.tags.contains("firmware"), "content keywords count too");
    assert!(whoop.tags.contains("build"), "reddit flair kept as tag");
}

#[tokio::test]
async fn partial_failure_still_stores_snapshot() {
    let ok = Scripted::new("good", &["Alpha", "Beta"], Duration::ZERO);
    let bad = Scripted::failing("bad");
    let fetchers: Vec<DynFetcher> = vec![ok, bad];
    let agg = aggregator_with(fetchers, EngineConfig::default());

    let report = agg.refresh(&FetchContext::new()).await.unwrap();
    assert!(report.is_partial());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source_id, "bad");
    assert!(report.failures[0].error.contains("unreachable"));

    let page = agg.get_items(&all()).await;
    assert_eq!(page.total_count, 2);
    assert_eq!(page.source_count, 1);
}

#[tokio::test]
async fn total_failure_keeps_previous_snapshot() {
    let a = Scripted::new("a", &["Kept headline"], Duration::ZERO);
    let b = Scripted::new("b", &["Other headline"], Duration::ZERO);
    let fetchers: Vec<DynFetcher> = vec![a.clone(), b.clone()];
    let agg = aggregator_with(fetchers, EngineConfig::default());

    let first = agg.refresh(&FetchContext::new()).await.unwrap();

    a.set_failing(true);
    b.set_failing(true);
    match agg.refresh(&FetchContext::new()).await {
        Err(RefreshError::AllSourcesFailed { failures }) => {
            let ids: Vec<_> = failures.iter().map(|f| f.source_id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b"]);
        }
        other => panic!("expected AllSourcesFailed, got {other:?}"),
    }

    let page = agg.get_items(&all()).await;
    assert_eq!(page.total_count, 2, "stale snapshot still served");
    assert_eq!(page.fetched_at, Some(first.fetched_at));
    assert_eq!(agg.phase(), Phase::Cached);
}

#[tokio::test]
async fn no_snapshot_means_empty_page() {
    let agg = fixture_aggregator();
    let page = agg.get_items(&FilterParams::default()).await;
    assert!(page.items.is_empty());
    assert_eq!(page.total_count, 0);
    assert_eq!(page.fetched_at, None);
}

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_are_serialized() {
    let slow = Scripted::new("slow", &["One"], Duration::from_secs(5));
    let fetchers: Vec<DynFetcher> = vec![slow.clone()];
    let agg = Arc::new(aggregator_with(fetchers, EngineConfig::default()));

    let first = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh(&FetchContext::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(agg.phase(), Phase::Fetching);

    assert!(matches!(
        agg.try_refresh(&FetchContext::new()).await,
        Err(RefreshError::InProgress)
    ));

    // a blocking refresh queues behind the running one instead of overlapping it
    let second = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh(&FetchContext::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_finalizes_with_completed_sources() {
    let fast = Scripted::new("fast", &["Quick news"], Duration::ZERO);
    let slow = Scripted::new("slow", &["Never arrives"], Duration::from_secs(60));
    let fetchers: Vec<DynFetcher> = vec![fast, slow];
    let agg = Arc::new(aggregator_with(fetchers, EngineConfig::default()));

    let token = CancellationToken::new();
    let ctx = FetchContext::with_cancel(token.clone());
    let task = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh(&ctx).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    token.cancel();

    let report = task.await.unwrap().expect("fast source completed");
    assert_eq!(report.sources_ok, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source_id, "slow");
    assert_eq!(report.failures[0].error, "cancelled");

    let titles: Vec<_> = agg
        .get_items(&all())
        .await
        .items
        .into_iter()
        .map(|i| i.title)
        .collect();
    assert_eq!(titles, vec!["Quick news"]);
}

#[tokio::test(start_paused = true)]
async fn refresh_deadline_cuts_slow_sources() {
    let fast = Scripted::new("fast", &["On time"], Duration::from_millis(100));
    let slow = Scripted::new("slow", &["Late"], Duration::from_secs(30));
    let fetchers: Vec<DynFetcher> = vec![fast, slow];
    let cfg = EngineConfig {
        refresh_timeout_secs: 2,
        ..EngineConfig::default()
    };
    let agg = aggregator_with(fetchers, cfg);

    let report = agg.refresh(&FetchContext::new()).await.unwrap();
    assert_eq!(report.sources_ok, 1);
    assert_eq!(report.failures[0].source_id, "slow");
    assert_eq!(report.failures[0].error, "deadline exceeded");
    assert!(report.duration_ms <= 2_100);
}

#[tokio::test(start_paused = true)]
async fn snapshot_expires_after_ttl() {
    let fetchers: Vec<DynFetcher> = vec![Scripted::new("a", &["Short lived"], Duration::ZERO)];
    let cfg = EngineConfig {
        snapshot_ttl_secs: 5,
        ..EngineConfig::default()
    };
    let agg = aggregator_with(fetchers, cfg);
    agg.refresh(&FetchContext::new()).await.unwrap();
    assert_eq!(agg.get_items(&all()).await.total_count, 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(agg.get_items(&all()).await.total_count, 0);
}

#[tokio::test(start_paused = true)]
async fn zero_snapshot_ttl_keeps_stale_data_indefinitely() {
    let a = Scripted::new("a", &["Long lived"], Duration::ZERO);
    let fetchers: Vec<DynFetcher> = vec![a.clone()];
    let cfg = EngineConfig {
        snapshot_ttl_secs: 0,
        ..EngineConfig::default()
    };
    let agg = aggregator_with(fetchers, cfg);
    agg.refresh(&FetchContext::new()).await.unwrap();

    a.set_failing(true);
    tokio::time::advance(Duration::from_secs(30 * 24 * 3600)).await;
    assert!(agg.refresh(&FetchContext::new()).await.is_err());
    assert_eq!(agg.get_items(&all()).await.total_count, 1);
}
