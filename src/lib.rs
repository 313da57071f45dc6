// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod ratelimit;
pub mod scheduler;
pub mod tagger;
pub mod text;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{Aggregator, Phase, RefreshReport, SourceStatus};
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::{CacheError, RefreshError, SourceFailure};
pub use crate::fetch::FetchContext;
pub use crate::model::{FeedItem, FeedPage, FilterParams, SortKey, SourceInfo};
