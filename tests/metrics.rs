// tests/metrics.rs
//
// The Prometheus recorder is process-global, so this binary installs it exactly once.

mod common;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::fixture_aggregator;
use feed_aggregator::config::AppConfig;
use feed_aggregator::fetch::FetchContext;
use feed_aggregator::metrics::Metrics;

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::init(&AppConfig::builtin()).expect("install recorder");
    assert!(
        Metrics::init(&AppConfig::builtin()).is_err(),
        "second install must fail, not panic"
    );

    let agg = fixture_aggregator();
    agg.refresh(&FetchContext::new()).await.expect("refresh");

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(
        body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();

    for series in [
        "feeds_refresh_total",
        "feeds_items_fetched_total",
        "feeds_duplicates_removed_total",
        "feeds_snapshot_items",
        "feeds_last_refresh_ts",
        "feeds_fetch_ms",
        "feeds_config_sources",
    ] {
        assert!(text.contains(series), "missing {series} in:\n{text}");
    }
    assert!(text.contains("feeds_snapshot_items 6"));
}
