// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache statistics.
//!
//! The coordinator reports eight side-effect-only events through
//! [`StatsHandler`]; implementations must be safe to call from concurrent
//! tasks. [`Counters`] is the built-in atomic implementation, and
//! [`Handlers`] fans one stream of events out to several handlers with a
//! global disable switch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

/// Collector for cache events.
///
/// `hit`/`miss` count the overall tiered outcome; `local_*` and `remote_*`
/// attribute it per tier; `query`/`query_fail` count loader invocations.
pub trait StatsHandler: Send + Sync {
    /// The tiered lookup produced a value (or a cached negative answer).
    fn hit(&self);
    /// The tiered lookup came up empty.
    fn miss(&self);
    /// The local tier had the key.
    fn local_hit(&self);
    /// The local tier did not have the key.
    fn local_miss(&self);
    /// The remote tier had the key.
    fn remote_hit(&self);
    /// The remote tier did not have the key.
    fn remote_miss(&self);
    /// A loader was invoked.
    fn query(&self);
    /// A loader failed.
    fn query_fail(&self, error: &Error);
}

/// Atomic counters with a readable snapshot.
#[derive(Debug, Default)]
pub struct Counters {
    hit: AtomicU64,
    miss: AtomicU64,
    local_hit: AtomicU64,
    local_miss: AtomicU64,
    remote_hit: AtomicU64,
    remote_miss: AtomicU64,
    query: AtomicU64,
    query_fail: AtomicU64,
}

impl Counters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            local_hit: self.local_hit.load(Ordering::Relaxed),
            local_miss: self.local_miss.load(Ordering::Relaxed),
            remote_hit: self.remote_hit.load(Ordering::Relaxed),
            remote_miss: self.remote_miss.load(Ordering::Relaxed),
            query: self.query.load(Ordering::Relaxed),
            query_fail: self.query_fail.load(Ordering::Relaxed),
        }
    }
}

impl StatsHandler for Counters {
    fn hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    fn local_hit(&self) {
        self.local_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn local_miss(&self) {
        self.local_miss.fetch_add(1, Ordering::Relaxed);
    }

    fn remote_hit(&self) {
        self.remote_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn remote_miss(&self) {
        self.remote_miss.fetch_add(1, Ordering::Relaxed);
    }

    fn query(&self) {
        self.query.fetch_add(1, Ordering::Relaxed);
    }

    fn query_fail(&self, _error: &Error) {
        self.query_fail.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs, reason = "field names mirror the handler hooks")]
pub struct StatsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub local_hit: u64,
    pub local_miss: u64,
    pub remote_hit: u64,
    pub remote_miss: u64,
    pub query: u64,
    pub query_fail: u64,
}

impl StatsSnapshot {
    /// Overall hit rate in percent, or `None` before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        rate(self.hit, self.miss)
    }

    /// Local-tier hit rate in percent, or `None` before any local lookup.
    #[must_use]
    pub fn local_hit_rate(&self) -> Option<f64> {
        rate(self.local_hit, self.local_miss)
    }

    /// Remote-tier hit rate in percent, or `None` before any remote lookup.
    #[must_use]
    pub fn remote_hit_rate(&self) -> Option<f64> {
        rate(self.remote_hit, self.remote_miss)
    }
}

fn rate(hit: u64, miss: u64) -> Option<f64> {
    let total = hit + miss;
    (total > 0).then(|| hit as f64 * 100.0 / total as f64)
}

/// Fans stats events out to several handlers, with a disable switch that
/// turns every hook into a no-op.
pub struct Handlers {
    disabled: bool,
    handlers: Vec<Arc<dyn StatsHandler>>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("disabled", &self.disabled)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Handlers {
    /// Creates a fan-out over `handlers`.
    #[must_use]
    pub fn new(disabled: bool, handlers: Vec<Arc<dyn StatsHandler>>) -> Self {
        Self { disabled, handlers }
    }

    fn each(&self, f: impl Fn(&dyn StatsHandler)) {
        if self.disabled {
            return;
        }
        for handler in &self.handlers {
            f(handler.as_ref());
        }
    }
}

impl StatsHandler for Handlers {
    fn hit(&self) {
        self.each(|h| h.hit());
    }

    fn miss(&self) {
        self.each(|h| h.miss());
    }

    fn local_hit(&self) {
        self.each(|h| h.local_hit());
    }

    fn local_miss(&self) {
        self.each(|h| h.local_miss());
    }

    fn remote_hit(&self) {
        self.each(|h| h.remote_hit());
    }

    fn remote_miss(&self) {
        self.each(|h| h.remote_miss());
    }

    fn query(&self) {
        self.each(|h| h.query());
    }

    fn query_fail(&self, error: &Error) {
        self.each(|h| h.query_fail(error));
    }
}

/// Spawns the periodic hit-rate logger for one cache. Stops with the
/// cache's shutdown signal.
pub(crate) fn spawn_logger(
    name: String,
    counters: Arc<Counters>,
    interval: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    crate::util::spawn_recovered("stats-logger", async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => log_summary(&name, &counters.snapshot()),
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// Logs a periodic hit-rate summary for one cache.
pub(crate) fn log_summary(name: &str, snapshot: &StatsSnapshot) {
    tracing::info!(
        cache = name,
        hit = snapshot.hit,
        miss = snapshot.miss,
        hit_rate = snapshot.hit_rate().map(|r| format!("{r:.2}%")),
        local_hit = snapshot.local_hit,
        local_miss = snapshot.local_miss,
        remote_hit = snapshot.remote_hit,
        remote_miss = snapshot.remote_miss,
        query = snapshot.query,
        query_fail = snapshot.query_fail,
        "cache stats",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = Counters::new();
        counters.hit();
        counters.hit();
        counters.miss();
        counters.local_hit();
        counters.remote_miss();
        counters.query();
        counters.query_fail(&Error::CacheMiss);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.hit, 2);
        assert_eq!(snapshot.miss, 1);
        assert_eq!(snapshot.local_hit, 1);
        assert_eq!(snapshot.local_miss, 0);
        assert_eq!(snapshot.remote_miss, 1);
        assert_eq!(snapshot.query, 1);
        assert_eq!(snapshot.query_fail, 1);
    }

    #[test]
    fn hit_rate_is_none_before_traffic() {
        assert_eq!(StatsSnapshot::default().hit_rate(), None);
    }

    #[test]
    fn hit_rate_is_a_percentage() {
        let counters = Counters::new();
        counters.hit();
        counters.hit();
        counters.hit();
        counters.miss();
        let rate = counters.snapshot().hit_rate().unwrap();
        assert!((rate - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_fanout_drops_events() {
        let counters = Arc::new(Counters::new());
        let handlers = Handlers::new(true, vec![Arc::clone(&counters) as Arc<dyn StatsHandler>]);
        handlers.hit();
        handlers.query();
        assert_eq!(counters.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn fanout_reaches_every_handler() {
        let a = Arc::new(Counters::new());
        let b = Arc::new(Counters::new());
        let handlers = Handlers::new(
            false,
            vec![
                Arc::clone(&a) as Arc<dyn StatsHandler>,
                Arc::clone(&b) as Arc<dyn StatsHandler>,
            ],
        );
        handlers.remote_hit();
        assert_eq!(a.snapshot().remote_hit, 1);
        assert_eq!(b.snapshot().remote_hit, 1);
    }
}
