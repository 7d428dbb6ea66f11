// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for constructing caches.
//!
//! Configuration is validated when [`build`](Builder::build) runs: unknown
//! codec names, zero-sized channels or worker counts, and sync-local without
//! both tiers are rejected then, never at call time.

use std::sync::Arc;
use std::time::Duration;

use duocache_tier::{LocalTier, RemoteTier};
use tokio::sync::watch;

use crate::cache::{Cache, Inner};
use crate::codec::Codec;
use crate::error::ConfigError;
use crate::events::{EventBus, EventHandler};
use crate::group::FlightGroup;
use crate::refresh::{self, Refresher};
use crate::stats::{self, Counters, Handlers, StatsHandler};
use crate::util;

const DEFAULT_NAME: &str = "default";
const DEFAULT_REMOTE_EXPIRY: Duration = Duration::from_secs(60 * 60);
const DEFAULT_NOT_FOUND_EXPIRY: Duration = Duration::from_secs(60);
const DEFAULT_REFRESH_CONCURRENCY: usize = 4;
const DEFAULT_EVENT_BUFFER: usize = 100;
const DEFAULT_SEPARATOR: &str = ":";
const MIN_REFRESH_DURATION: Duration = Duration::from_secs(1);
const MAX_OFFSET: Duration = Duration::from_secs(10);

/// Builder for a [`Cache`].
///
/// # Examples
///
/// ```
/// use duocache::Cache;
/// use duocache_memory::InMemoryTier;
/// use std::time::Duration;
///
/// let cache = Cache::builder()
///     .name("sessions")
///     .local(InMemoryTier::with_capacity(100_000))
///     .remote_expiry(Duration::from_secs(1800))
///     .not_found_expiry(Duration::from_secs(30))
///     .build()?;
/// # Ok::<(), duocache::ConfigError>(())
/// ```
pub struct Builder {
    name: String,
    local: Option<Arc<dyn LocalTier>>,
    remote: Option<Arc<dyn RemoteTier>>,
    codec: String,
    remote_expiry: Duration,
    not_found_expiry: Duration,
    offset: Option<Duration>,
    refresh_duration: Duration,
    stop_refresh_after_last_access: Option<Duration>,
    refresh_concurrency: usize,
    stats_disabled: bool,
    stats_handlers: Vec<Arc<dyn StatsHandler>>,
    stats_log_interval: Option<Duration>,
    source_id: Option<String>,
    sync_local: bool,
    event_buffer: usize,
    event_handler: Option<EventHandler>,
    separator: String,
    separator_disabled: bool,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("name", &self.name)
            .field("codec", &self.codec)
            .field("local", &self.local.is_some())
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder with every option at its default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            local: None,
            remote: None,
            codec: Codec::default().name().to_owned(),
            remote_expiry: DEFAULT_REMOTE_EXPIRY,
            not_found_expiry: DEFAULT_NOT_FOUND_EXPIRY,
            offset: None,
            refresh_duration: Duration::ZERO,
            stop_refresh_after_last_access: None,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
            stats_disabled: false,
            stats_handlers: Vec::new(),
            stats_log_interval: None,
            source_id: None,
            sync_local: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
            event_handler: None,
            separator: DEFAULT_SEPARATOR.to_owned(),
            separator_disabled: false,
        }
    }

    /// Names the cache for logs and stats output. Default `"default"`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the in-process tier.
    #[must_use]
    pub fn local(mut self, local: impl LocalTier + 'static) -> Self {
        self.local = Some(Arc::new(local));
        self
    }

    /// Sets the remote tier.
    #[must_use]
    pub fn remote(mut self, remote: impl RemoteTier + 'static) -> Self {
        self.remote = Some(Arc::new(remote));
        self
    }

    /// Selects the value codec by name. Default `"msgpack"`.
    #[must_use]
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Default remote TTL for writes without an explicit one. Default 1 h.
    #[must_use]
    pub fn remote_expiry(mut self, expiry: Duration) -> Self {
        self.remote_expiry = expiry;
        self
    }

    /// TTL for negative-cache placeholder writes. Default 1 min.
    #[must_use]
    pub fn not_found_expiry(mut self, expiry: Duration) -> Self {
        self.not_found_expiry = expiry;
        self
    }

    /// Jitter bound added to placeholder TTLs. Defaults to a tenth of the
    /// not-found expiry, capped at 10 s.
    #[must_use]
    pub fn offset(mut self, offset: Duration) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Tick period of the refresh engine. Zero (the default) disables it;
    /// positive values shorter than 1 s are clamped up to 1 s.
    ///
    /// A positive value makes [`build`](Self::build) spawn the tick loop,
    /// which requires a running tokio runtime.
    #[must_use]
    pub fn refresh_duration(mut self, duration: Duration) -> Self {
        self.refresh_duration = duration;
        self
    }

    /// How long an unread refresh task survives before it is cancelled.
    /// Defaults to the refresh duration plus 1 s.
    #[must_use]
    pub fn stop_refresh_after_last_access(mut self, duration: Duration) -> Self {
        self.stop_refresh_after_last_access = Some(duration);
        self
    }

    /// Maximum simultaneous refresh workers. Default 4.
    #[must_use]
    pub fn refresh_concurrency(mut self, concurrency: usize) -> Self {
        self.refresh_concurrency = concurrency;
        self
    }

    /// Turns every stats hook into a no-op.
    #[must_use]
    pub fn stats_disabled(mut self) -> Self {
        self.stats_disabled = true;
        self
    }

    /// Adds a stats handler alongside the built-in counters.
    #[must_use]
    pub fn stats_handler(mut self, handler: impl StatsHandler + 'static) -> Self {
        self.stats_handlers.push(Arc::new(handler));
        self
    }

    /// Logs a periodic hit-rate summary at this interval.
    ///
    /// Makes [`build`](Self::build) spawn the logging task, which requires
    /// a running tokio runtime.
    #[must_use]
    pub fn stats_log_interval(mut self, interval: Duration) -> Self {
        self.stats_log_interval = Some(interval);
        self
    }

    /// Overrides the random instance identity stamped on events.
    #[must_use]
    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Enables invalidation events for syncing peer L1 caches. Requires
    /// both tiers and an [`event_handler`](Self::event_handler).
    #[must_use]
    pub fn sync_local(mut self) -> Self {
        self.sync_local = true;
        self
    }

    /// Capacity of the bounded event channel. Default 100.
    #[must_use]
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Sets the consumer invoked for every emitted event.
    #[must_use]
    pub fn event_handler(mut self, handler: impl Fn(crate::Event) + Send + Sync + 'static) -> Self {
        self.event_handler = Some(Arc::new(handler));
        self
    }

    /// Separator between prefix and id in composite keys. Default `":"`.
    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Concatenates prefix and id directly, with no separator.
    #[must_use]
    pub fn separator_disabled(mut self) -> Self {
        self.separator_disabled = true;
        self
    }

    /// Validates the configuration and constructs the cache.
    ///
    /// # Errors
    ///
    /// Rejects unknown codec names, a zero event-channel capacity, a zero
    /// refresh concurrency, and `sync_local` without both tiers.
    pub fn build(self) -> Result<Cache, ConfigError> {
        let Some(codec) = Codec::resolve(&self.codec) else {
            return Err(ConfigError::UnknownCodec(self.codec));
        };
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        if self.refresh_concurrency == 0 {
            return Err(ConfigError::ZeroRefreshConcurrency);
        }
        if self.sync_local && (self.local.is_none() || self.remote.is_none()) {
            return Err(ConfigError::SyncLocalRequiresBothTiers);
        }

        let refresh_duration = if self.refresh_duration.is_zero() {
            Duration::ZERO
        } else {
            if self.refresh_duration < MIN_REFRESH_DURATION {
                tracing::warn!(
                    cache = %self.name,
                    requested_ms = self.refresh_duration.as_millis() as u64,
                    "refresh duration below one second, clamping",
                );
            }
            self.refresh_duration.max(MIN_REFRESH_DURATION)
        };
        let stop_after = self
            .stop_refresh_after_last_access
            .unwrap_or(refresh_duration + Duration::from_secs(1));
        let offset = self.offset.unwrap_or(self.not_found_expiry / 10).min(MAX_OFFSET);
        let separator = if self.separator_disabled { String::new() } else { self.separator };

        let counters = Arc::new(Counters::new());
        let mut handlers: Vec<Arc<dyn StatsHandler>> = vec![Arc::clone(&counters) as Arc<dyn StatsHandler>];
        handlers.extend(self.stats_handlers);
        let stats = Handlers::new(self.stats_disabled, handlers);

        let (shutdown, _) = watch::channel(false);

        let events = match (self.sync_local, self.event_handler) {
            (true, Some(handler)) => Some(EventBus::start(self.event_buffer, handler, shutdown.subscribe())),
            _ => None,
        };

        let inner = Arc::new(Inner {
            name: self.name,
            local: self.local,
            remote: self.remote,
            codec,
            remote_expiry: self.remote_expiry,
            not_found_expiry: self.not_found_expiry,
            offset,
            separator,
            stats,
            counters: Arc::clone(&counters),
            group: FlightGroup::new(),
            mget_group: FlightGroup::new(),
            refresher: Refresher::new(refresh_duration, stop_after, self.refresh_concurrency),
            events,
            source_id: self.source_id.unwrap_or_else(util::random_source_id),
            shutdown,
        });

        if inner.refresher.enabled() {
            refresh::spawn_tick(&inner);
        }
        if let Some(interval) = self.stats_log_interval
            && !self.stats_disabled
        {
            stats::spawn_logger(inner.name.clone(), counters, interval, inner.shutdown.subscribe());
        }

        Ok(Cache { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use duocache_tier::testing::{MockLocal, MockRemote};

    #[test]
    fn defaults_build_a_local_cache() {
        let cache = Builder::new().local(MockLocal::new()).build().unwrap();
        assert_eq!(cache.name(), "default");
        assert_eq!(cache.cache_type(), crate::CacheType::Local);
        assert_eq!(cache.source_id().len(), 16);
    }

    #[test]
    fn unknown_codec_is_rejected() {
        let result = Builder::new().local(MockLocal::new()).codec("protobuf").build();
        assert!(matches!(result, Err(ConfigError::UnknownCodec(name)) if name == "protobuf"));
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        let result = Builder::new().local(MockLocal::new()).event_buffer(0).build();
        assert!(matches!(result, Err(ConfigError::ZeroEventCapacity)));
    }

    #[test]
    fn zero_refresh_concurrency_is_rejected() {
        let result = Builder::new().local(MockLocal::new()).refresh_concurrency(0).build();
        assert!(matches!(result, Err(ConfigError::ZeroRefreshConcurrency)));
    }

    #[test]
    fn sync_local_needs_both_tiers() {
        let result = Builder::new().local(MockLocal::new()).sync_local().event_handler(|_| {}).build();
        assert!(matches!(result, Err(ConfigError::SyncLocalRequiresBothTiers)));
    }

    #[tokio::test]
    async fn sync_local_with_both_tiers_builds() {
        let cache = Builder::new()
            .local(MockLocal::new())
            .remote(MockRemote::new())
            .sync_local()
            .event_handler(|_| {})
            .build()
            .unwrap();
        assert_eq!(cache.cache_type(), crate::CacheType::Both);
    }

    #[tokio::test]
    async fn sub_second_refresh_duration_is_clamped() {
        let cache = Builder::new()
            .local(MockLocal::new())
            .refresh_duration(Duration::from_millis(200))
            .build()
            .unwrap();
        // The engine came up; a clamped period is observable only through
        // timing, so just confirm construction worked and nothing is
        // enrolled yet.
        assert_eq!(cache.task_count(), 0);
    }

    #[test]
    fn source_id_override_is_used() {
        let cache = Builder::new().local(MockLocal::new()).source_id("abc123").build().unwrap();
        assert_eq!(cache.source_id(), "abc123");
    }
}
