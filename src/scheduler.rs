// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::error::RefreshError;
use crate::fetch::FetchContext;

/// Spawn a periodic refresh loop. The first tick fires immediately so the cache is warm shortly
/// after startup. Cancelling `shutdown` stops the loop and aborts an in-flight refresh.
///
/// A zero period disables periodic refresh: the returned task finishes without refreshing.
pub fn spawn_refresh_scheduler(
    aggregator: Arc<Aggregator>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if every.is_zero() {
            tracing::info!(target: "scheduler", "periodic refresh disabled");
            return;
        }
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let ctx = FetchContext::with_cancel(shutdown.child_token());
            match aggregator.try_refresh(&ctx).await {
                Ok(report) => tracing::debug!(
                    target: "scheduler",
                    items = report.items_kept,
                    partial = report.is_partial(),
                    "scheduled refresh tick"
                ),
                Err(RefreshError::InProgress) => {
                    tracing::debug!(target: "scheduler", "refresh already running, tick skipped")
                }
                Err(e) => tracing::warn!(target: "scheduler", error = %e, "scheduled refresh failed"),
            }
        }
        tracing::info!(target: "scheduler", "refresh scheduler stopped");
    })
}
