// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring the in-memory tier.
//!
//! The builder abstracts the underlying moka configuration, providing a
//! stable API surface without exposing moka's types.

use std::time::Duration;

use crate::tier::InMemoryTier;

/// Builder for configuring an [`InMemoryTier`].
///
/// # Examples
///
/// ```
/// use duocache_memory::InMemoryTier;
/// use std::time::Duration;
///
/// let tier = InMemoryTier::builder()
///     .max_capacity(10_000)
///     .time_to_live(Duration::from_secs(300))
///     .jitter(Duration::from_secs(5))
///     .name("user-tier")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTierBuilder {
    pub(crate) max_capacity: Option<u64>,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) time_to_live: Option<Duration>,
    pub(crate) jitter: Option<Duration>,
    pub(crate) name: Option<String>,
}

impl InMemoryTierBuilder {
    /// Creates a new builder with default settings: unbounded capacity,
    /// `TinyLFU` eviction, no time-based expiration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum capacity of the tier.
    ///
    /// Once the capacity is reached, entries are evicted using the
    /// `TinyLFU` policy. If not set, the tier is unbounded.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Sets the initial capacity (pre-allocation hint).
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Sets the base time-to-live applied to every write.
    ///
    /// Each entry expires after this duration plus a random offset in
    /// `[0, jitter)`; the offset spreads out expiry so a burst of writes
    /// does not turn into a burst of misses. Without a TTL, entries live
    /// until evicted by capacity pressure.
    #[must_use]
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Overrides the expiry jitter bound.
    ///
    /// Defaults to a tenth of the TTL, capped at 10 seconds. Pass
    /// `Duration::ZERO` for exact expiry.
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Sets a name for the tier, surfaced in moka debug output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the configured [`InMemoryTier`].
    #[must_use]
    pub fn build(self) -> InMemoryTier {
        InMemoryTier::from_builder(&self)
    }
}
