use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::aggregator::{Aggregator, Phase, SourceStatus};
use crate::error::RefreshError;
use crate::fetch::FetchContext;
use crate::model::{FeedPage, FilterParams, SourceInfo};
use crate::tagger::TagRules;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/feeds", get(list_feeds))
        .route("/api/feeds/sources", get(list_sources))
        .route("/api/feeds/status", get(status))
        .route("/api/feeds/refresh", post(refresh))
        .route("/api/tags", get(list_tags))
        .route("/api/tags/{name}", put(put_tag).delete(delete_tag))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Raw query string for `/api/feeds`. Every field is parsed leniently: a value that does not
/// parse is dropped, never a 400.
#[derive(Debug, Default, serde::Deserialize)]
pub struct FeedQuery {
    limit: Option<String>,
    offset: Option<String>,
    /// Comma-separated source ids.
    sources: Option<String>,
    #[serde(alias = "type")]
    source_type: Option<String>,
    #[serde(alias = "query", alias = "search")]
    q: Option<String>,
    sort: Option<String>,
    from: Option<String>,
    to: Option<String>,
    tag: Option<String>,
}

impl FeedQuery {
    pub fn into_params(self) -> FilterParams {
        let source_ids: HashSet<String> = self
            .sources
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        FilterParams {
            limit: self.limit.and_then(|v| v.trim().parse().ok()),
            offset: self.offset.and_then(|v| v.trim().parse().ok()),
            source_ids,
            source_type: self.source_type,
            query: self.q,
            sort: self
                .sort
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            from_date: self.from.as_deref().and_then(|s| parse_date(s, false)),
            to_date: self.to.as_deref().and_then(|s| parse_date(s, true)),
            tag: self.tag,
        }
    }
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` (start of day, or end of day for upper bounds).
fn parse_date(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let t = if end_of_day {
        day.and_hms_opt(23, 59, 59)?
    } else {
        day.and_hms_opt(0, 0, 0)?
    };
    Some(t.and_utc())
}

async fn list_feeds(State(state): State<AppState>, Query(q): Query<FeedQuery>) -> Json<FeedPage> {
    Json(state.aggregator.get_items(&q.into_params()).await)
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    Json(state.aggregator.get_sources())
}

#[derive(serde::Serialize)]
struct StatusOut {
    phase: Phase,
    fetched_at: Option<DateTime<Utc>>,
    items: usize,
    sources: Vec<SourceStatus>,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    let agg = &state.aggregator;
    let snapshot = agg.snapshot().await;
    Json(StatusOut {
        phase: agg.phase(),
        fetched_at: snapshot.as_ref().map(|s| s.fetched_at),
        items: snapshot.as_ref().map_or(0, |s| s.items.len()),
        sources: agg.source_status(),
    })
}

async fn refresh(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.aggregator.try_refresh(&FetchContext::new()).await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(e) => {
            let code = match &e {
                RefreshError::InProgress => StatusCode::CONFLICT,
                RefreshError::NoEnabledSources => StatusCode::SERVICE_UNAVAILABLE,
                RefreshError::AllSourcesFailed { .. } => StatusCode::BAD_GATEWAY,
                RefreshError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let failures = match &e {
                RefreshError::AllSourcesFailed { failures } => json!(failures),
                _ => json!([]),
            };
            (
                code,
                Json(json!({ "error": e.to_string(), "failures": failures })),
            )
        }
    }
}

async fn list_tags(State(state): State<AppState>) -> Json<TagRules> {
    Json(state.aggregator.tagger().rules())
}

/// Replaces a category's keyword list. An empty list removes the category.
async fn put_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(keywords): Json<Vec<String>>,
) -> Result<Json<TagRules>, StatusCode> {
    if name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let tagger = state.aggregator.tagger();
    tagger.set_rule(&name, keywords);
    Ok(Json(tagger.rules()))
}

async fn delete_tag(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    if state.aggregator.tagger().remove_rule(&name) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
