// src/ratelimit.rs
//! Per-host minimum-interval gate consulted by fetchers before any network I/O.
//!
//! - `allow` is non-blocking and only advances a host's clock when it grants.
//! - `wait` reserves the next free slot for the host and sleeps until it; concurrent waiters on
//!   one host are therefore spaced by at least `min_interval`. A waiter dropped mid-sleep gives
//!   its slot back.
//! - Hosts never block each other. `min_interval == 0` grants everything immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cache::DynCache;

/// Poll ceiling for the distributed variant's `wait`.
const DISTRIBUTED_POLL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, host: &str) -> bool;

    /// Returns once the caller may issue a request to `host`.
    async fn wait(&self, host: &str);
}

pub type DynRateLimiter = Arc<dyn RateLimiter>;

/// Process-local limiter: host → instant of the last granted (or reserved) request.
#[derive(Debug)]
pub struct HostRateLimiter {
    min_interval: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// `allow` evaluated at an explicit instant.
    pub fn allow_at(&self, host: &str, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        let mut last = self.last.lock().expect("rate limiter mutex poisoned");
        match last.get(host) {
            // A reserved slot may lie in the future; saturating keeps that a rejection.
            Some(&prev) if now.saturating_duration_since(prev) < self.min_interval => false,
            _ => {
                last.insert(host.to_string(), now);
                true
            }
        }
    }

    /// Reserve the earliest permitted instant for `host` at or after `now`.
    fn reserve_at<'a>(&'a self, host: &'a str, now: Instant) -> Reservation<'a> {
        let mut last = self.last.lock().expect("rate limiter mutex poisoned");
        let prev = last.get(host).copied();
        let slot = match prev {
            Some(prev) => (prev + self.min_interval).max(now),
            None => now,
        };
        last.insert(host.to_string(), slot);
        Reservation {
            limiter: self,
            host,
            slot,
            prev,
            committed: false,
        }
    }
}

/// A slot taken by `wait`. Dropped before `commit` (the waiter was cancelled), it hands the
/// slot back so no phantom request holds up the host.
struct Reservation<'a> {
    limiter: &'a HostRateLimiter,
    host: &'a str,
    slot: Instant,
    prev: Option<Instant>,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let Ok(mut last) = self.limiter.last.lock() else {
            return;
        };
        // A later waiter already chained onto this slot; its reservation stays as is.
        if last.get(self.host) != Some(&self.slot) {
            return;
        }
        match self.prev {
            Some(prev) => last.insert(self.host.to_string(), prev),
            None => last.remove(self.host),
        };
    }
}

#[async_trait]
impl RateLimiter for HostRateLimiter {
    async fn allow(&self, host: &str) -> bool {
        self.allow_at(host, Instant::now())
    }

    async fn wait(&self, host: &str) {
        if self.min_interval.is_zero() {
            return;
        }
        let reservation = self.reserve_at(host, Instant::now());
        tokio::time::sleep_until(reservation.slot).await;
        reservation.commit();
    }
}

/// Limiter shared across instances through the cache backend.
///
/// A grant writes a sentinel key with `min_interval` as its TTL; an existing key means "not
/// allowed". The check and the write are two separate round trips, so two instances asking at
/// nearly the same moment can both be granted. This is a best-effort spacing, not a guarantee;
/// strict coordination would need a central token service.
pub struct DistributedRateLimiter {
    min_interval: Duration,
    store: DynCache<u8>,
}

impl DistributedRateLimiter {
    pub fn new(min_interval: Duration, store: DynCache<u8>) -> Self {
        Self {
            min_interval,
            store,
        }
    }

    fn key(host: &str) -> String {
        format!("host:{host}")
    }
}

#[async_trait]
impl RateLimiter for DistributedRateLimiter {
    async fn allow(&self, host: &str) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        let key = Self::key(host);
        if self.store.get(&key).await.is_some() {
            return false;
        }
        if let Err(e) = self
            .store
            .set_with_ttl(&key, 1, self.min_interval)
            .await
        {
            // Fail open: the grant stands even without a sentinel.
            tracing::warn!(error = %e, host, "rate limiter sentinel write failed");
        }
        true
    }

    async fn wait(&self, host: &str) {
        let poll = self.min_interval.min(DISTRIBUTED_POLL);
        while !self.allow(host).await {
            tokio::time::sleep(poll).await;
        }
    }
}
