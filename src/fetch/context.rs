// src/fetch/context.rs
use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation + deadline handed to a refresh and every fetch inside it.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl FetchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled through `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Tightens the deadline to `now + timeout` (never loosens an earlier one).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let d = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(d, |cur| cur.min(d)));
        self
    }

    /// Applies `timeout` only when no deadline is set yet.
    pub fn or_timeout(self, timeout: Duration) -> Self {
        if self.deadline.is_some() {
            self
        } else {
            self.with_timeout(timeout)
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = deadline_elapsed(self.deadline) => {}
        }
    }

    /// Runs `fut` unless the context ends first, in which case `fut` is dropped.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            res = fut => res,
            _ = self.cancel.cancelled() => bail!("cancelled"),
            _ = deadline_elapsed(self.deadline) => bail!("deadline exceeded"),
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
