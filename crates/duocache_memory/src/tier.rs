// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The moka-backed tier implementation.

use std::time::{Duration, Instant};

use bytes::Bytes;
use duocache_tier::LocalTier;
use moka::{Expiry, sync::Cache};
use rand::Rng;

use crate::builder::InMemoryTierBuilder;

/// An in-process memory tier backed by moka.
///
/// Every write expires after the configured base TTL plus a random offset
/// drawn from `[0, jitter)`. The offset defaults to a tenth of the TTL,
/// capped at 10 seconds.
///
/// # Examples
///
/// ```
/// use duocache_memory::InMemoryTier;
/// use duocache_tier::LocalTier;
/// use bytes::Bytes;
///
/// let tier = InMemoryTier::with_capacity(1000);
///
/// tier.set("key", Bytes::from_static(b"value"));
/// assert_eq!(tier.get("key"), Some(Bytes::from_static(b"value")));
/// tier.del("key");
/// assert_eq!(tier.get("key"), None);
/// ```
#[derive(Clone)]
pub struct InMemoryTier {
    inner: Cache<String, Bytes>,
}

impl std::fmt::Debug for InMemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTier")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTier {
    /// Creates a new unbounded tier with no time-based expiration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new tier with a maximum capacity.
    ///
    /// Once the capacity is reached, entries are evicted using the
    /// `TinyLFU` policy (LRU eviction with LFU admission).
    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self::builder().max_capacity(max_capacity).build()
    }

    /// Creates a new builder for configuring the tier.
    #[must_use]
    pub fn builder() -> InMemoryTierBuilder {
        InMemoryTierBuilder::new()
    }

    /// Returns the number of entries currently held.
    ///
    /// The count is an approximation while writes are in flight.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub(crate) fn from_builder(builder: &InMemoryTierBuilder) -> Self {
        let mut moka_builder = Cache::builder();

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        if let Some(ttl) = builder.time_to_live {
            let jitter = builder.jitter.unwrap_or_else(|| default_jitter(ttl));
            moka_builder = moka_builder.expire_after(JitteredExpiry { ttl, jitter });
        }

        Self {
            inner: moka_builder.build(),
        }
    }
}

impl LocalTier for InMemoryTier {
    fn set(&self, key: &str, value: Bytes) {
        self.inner.insert(key.to_owned(), value);
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.get(key)
    }

    fn del(&self, key: &str) {
        self.inner.invalidate(key);
    }
}

const MAX_JITTER: Duration = Duration::from_secs(10);

fn default_jitter(ttl: Duration) -> Duration {
    (ttl / 10).min(MAX_JITTER)
}

/// Expires entries after the base TTL plus a random offset in `[0, jitter)`.
struct JitteredExpiry {
    ttl: Duration,
    jitter: Duration,
}

impl Expiry<String, Bytes> for JitteredExpiry {
    fn expire_after_create(&self, _key: &String, _value: &Bytes, _created_at: Instant) -> Option<Duration> {
        let offset = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::thread_rng().gen_range(0..self.jitter.as_nanos() as u64))
        };
        Some(self.ttl + offset)
    }
}
