// src/error.rs
//! Typed errors for the engine surfaces (cache backends and refresh cycles).
//! Fetchers and wiring stay on `anyhow`, these are the errors callers branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend could not be reached when it was selected.
    #[error("cache backend unavailable: {0}")]
    Unavailable(#[source] redis::RedisError),

    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache value (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One source that did not contribute to a refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no enabled sources configured")]
    NoEnabledSources,

    #[error("all {} sources failed: {}", .failures.len(), summarize(.failures))]
    AllSourcesFailed { failures: Vec<SourceFailure> },

    #[error("a refresh is already in progress")]
    InProgress,

    #[error("storing snapshot failed: {0}")]
    Cache(#[from] CacheError),
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.source_id, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_failed_message_lists_every_source() {
        let err = RefreshError::AllSourcesFailed {
            failures: vec![
                SourceFailure {
                    source_id: "dronedj".into(),
                    error: "timeout".into(),
                },
                SourceFailure {
                    source_id: "r-fpv".into(),
                    error: "HTTP 503".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("all 2 sources failed"));
        assert!(msg.contains("dronedj: timeout"));
        assert!(msg.contains("r-fpv: HTTP 503"));
    }
}
