// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache coordinator.
//!
//! [`Cache`] composes an optional in-process tier (L1) and an optional
//! shared remote tier (L2) behind one read-through/write-through API. The
//! hot read path for [`once`](Cache::once) is:
//!
//! L1 probe → (miss) → single-flight → L2 read → (miss) → loader →
//! encode → L1 write + expiring L2 write → event emission → decode.
//!
//! "Not found" answers from the loader are cached as a fixed placeholder
//! byte with a short, jittered TTL, so absent entities do not hammer the
//! backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use duocache_tier::{LocalTier, RemoteTier};
use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::watch;

use crate::builder::Builder;
use crate::codec::Codec;
use crate::error::Error;
use crate::events::{Event, EventBus, EventType};
use crate::group::FlightGroup;
use crate::item::Item;
use crate::refresh::Refresher;
use crate::stats::{Counters, Handlers, StatsHandler, StatsSnapshot};

/// The sentinel payload cached for "this key has no corresponding entity".
pub const NOT_FOUND_PLACEHOLDER: &[u8] = b"*";

/// Which tiers a cache is composed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// Only an in-process tier.
    Local,
    /// Only a remote tier.
    Remote,
    /// Both tiers.
    Both,
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Both => "both",
        })
    }
}

/// A two-tier read-through/write-through cache.
///
/// `Cache` is a cheap-to-clone handle; clones share tiers, statistics, the
/// single-flight groups, and the refresh engine.
///
/// # Examples
///
/// ```
/// use duocache::{Cache, Item};
/// use duocache_memory::InMemoryTier;
///
/// # futures::executor::block_on(async {
/// let cache = Cache::builder()
///     .name("users")
///     .local(InMemoryTier::with_capacity(10_000))
///     .build()?;
///
/// cache.set(Item::new("user:42").value("alice".to_owned())).await?;
/// let name: String = cache.get("user:42").await?;
/// assert_eq!(name, "alice");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Clone)]
pub struct Cache {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("cache_type", &self.cache_type())
            .field("codec", &self.inner.codec)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) local: Option<Arc<dyn LocalTier>>,
    pub(crate) remote: Option<Arc<dyn RemoteTier>>,
    pub(crate) codec: Codec,
    pub(crate) remote_expiry: Duration,
    pub(crate) not_found_expiry: Duration,
    pub(crate) offset: Duration,
    pub(crate) separator: String,
    pub(crate) stats: Handlers,
    pub(crate) counters: Arc<Counters>,
    pub(crate) group: FlightGroup<Result<Bytes, Error>>,
    pub(crate) mget_group: FlightGroup<std::collections::HashMap<String, Option<Bytes>>>,
    pub(crate) refresher: Refresher,
    pub(crate) events: Option<EventBus>,
    pub(crate) source_id: String,
    pub(crate) shutdown: watch::Sender<bool>,
}

#[derive(Clone, Copy)]
pub(crate) struct WriteFlags {
    pub(crate) set_xx: bool,
    pub(crate) set_nx: bool,
    pub(crate) skip_local: bool,
}

impl Cache {
    /// Creates a builder for configuring a cache.
    #[must_use]
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Returns the cache's name, used in logs and stats output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns this instance's identity, stamped on every emitted event.
    ///
    /// Event consumers compare it against incoming events to avoid
    /// invalidating their own L1 on their own writes.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.inner.source_id
    }

    /// Reports which tiers are configured.
    #[must_use]
    pub fn cache_type(&self) -> CacheType {
        match (&self.inner.local, &self.inner.remote) {
            (Some(_), Some(_)) => CacheType::Both,
            (None, Some(_)) => CacheType::Remote,
            _ => CacheType::Local,
        }
    }

    /// Returns a point-in-time copy of the built-in counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.counters.snapshot()
    }

    /// Returns the number of live refresh tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.refresher.task_count()
    }

    /// Stores the item's value (or its loader's result) in both tiers.
    ///
    /// A loader answering "no entity" writes the negative-cache placeholder
    /// and the call still succeeds; later reads of the key return
    /// [`Error::NotFound`] without touching the loader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TiersUnconfigured`] when no tier is configured,
    /// loader/codec errors, or the remote write failure.
    pub async fn set<T: Serialize>(&self, item: Item<T>) -> Result<(), Error> {
        self.inner.set_item(&item, EventType::Set).await
    }

    /// Stores a raw byte payload under the default remote expiry, bypassing
    /// the codec entirely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TiersUnconfigured`] or the remote write failure.
    pub async fn set_raw(&self, key: &str, value: impl Into<Bytes>) -> Result<(), Error> {
        let inner = &self.inner;
        if inner.local.is_none() && inner.remote.is_none() {
            return Err(Error::TiersUnconfigured);
        }
        let flags = WriteFlags {
            set_xx: false,
            set_nx: false,
            skip_local: false,
        };
        let ttl = inner.effective_remote_ttl(None, false, key);
        inner.apply_write(key, Some(value.into()), flags, ttl).await?;
        inner.emit(EventType::Set, vec![key.to_owned()]);
        Ok(())
    }

    /// Retrieves and decodes the value for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::CacheMiss`] when neither tier holds the key,
    /// [`Error::NotFound`] when the negative-cache placeholder is cached,
    /// [`Error::TiersUnconfigured`], or codec/transport failures.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        self.inner.get_value(key, false).await
    }

    /// Like [`get`](Self::get), but bypasses the local tier.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_skipping_local<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        self.inner.get_value(key, true).await
    }

    /// Retrieves the raw byte payload for `key` without decoding.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get); no codec errors are possible.
    pub async fn get_raw(&self, key: &str) -> Result<Bytes, Error> {
        self.inner.get_bytes(key, false).await
    }

    /// Gets the value for the item's key, or executes, caches, and returns
    /// the result of its loader, making sure that only one loader runs
    /// in-flight per key at a time. Duplicate concurrent callers wait for
    /// the original and receive the same outcome.
    ///
    /// With [`Item::refresh`], the key is also enrolled into the
    /// asynchronous refresh engine.
    ///
    /// If bytes served from a tier fail to decode, the key is dropped and
    /// the load retried once, healing entries written by an older codec.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the loader answered "no entity" (now or on
    /// a previous negative-cached call), [`Error::TiersUnconfigured`], or
    /// loader/codec/transport failures.
    pub async fn once<T>(&self, item: Item<T>) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let inner = &self.inner;
        if inner.local.is_none() && inner.remote.is_none() {
            return Err(Error::TiersUnconfigured);
        }
        if item.refresh {
            inner.refresher.enroll(&item, inner.codec);
        }

        let mut healed = false;
        loop {
            let (bytes, cached) = inner.once_bytes(&item).await?;
            match inner.codec.decode::<T>(&bytes) {
                Ok(value) => return Ok(value),
                Err(_) if cached && !healed => {
                    // Stale bytes from an older codec: drop and reload once.
                    healed = true;
                    let _ = self.delete(&item.key).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Removes `key` from both tiers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TiersUnconfigured`] or the remote delete failure.
    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        let inner = &self.inner;
        if inner.local.is_none() && inner.remote.is_none() {
            return Err(Error::TiersUnconfigured);
        }
        if let Some(local) = &inner.local {
            local.del(key);
        }
        if let Some(remote) = &inner.remote {
            remote.del(key).await?;
        }
        inner.emit(EventType::Delete, vec![key.to_owned()]);
        Ok(())
    }

    /// Removes `key` from the local tier only.
    ///
    /// This is what an event consumer calls when applying a peer's
    /// invalidation: the peer already updated L2.
    pub fn delete_from_local(&self, key: &str) {
        if let Some(local) = &self.inner.local {
            local.del(key);
        }
    }

    /// Reports whether a value for `key` exists in either tier.
    ///
    /// A cached negative answer counts as "does not exist".
    pub async fn exists(&self, key: &str) -> bool {
        self.inner.get_bytes(key, false).await.is_ok()
    }

    /// Stops the refresh engine, cancels all refresh tasks, and stops the
    /// event consumer and stats logger.
    ///
    /// Subsequent operations still reach the configured tiers.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.refresher.clear();
    }
}

impl Inner {
    pub(crate) fn emit(&self, event_type: EventType, keys: Vec<String>) {
        if let Some(bus) = &self.events {
            bus.send(Event {
                cache_name: self.name.clone(),
                source_id: self.source_id.clone(),
                event_type,
                keys,
            });
        }
    }

    /// Normalizes a per-item TTL into the expiry the remote write uses.
    /// `None` means "do not write to the remote tier at all".
    pub(crate) fn effective_remote_ttl(&self, ttl: Option<Duration>, local_only: bool, key: &str) -> Option<Duration> {
        if local_only {
            return None;
        }
        match ttl {
            None => Some(self.remote_expiry),
            Some(d) if d.is_zero() => Some(self.remote_expiry),
            Some(d) if d < Duration::from_secs(1) => {
                tracing::warn!(cache = %self.name, key = %key, ttl_ms = d.as_millis() as u64, "too short TTL, using the default");
                Some(self.remote_expiry)
            }
            Some(d) => Some(d),
        }
    }

    pub(crate) fn placeholder_jitter(&self) -> Duration {
        if self.offset.is_zero() {
            return Duration::ZERO;
        }
        let bound = self.offset.as_nanos() as u64;
        Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
    }

    /// Tiered byte lookup: L1 (unless skipped) → L2, with write-back and
    /// stats accounting. The placeholder maps to [`Error::NotFound`]; an
    /// empty tier outcome maps to [`Error::CacheMiss`].
    pub(crate) async fn get_bytes(&self, key: &str, skip_local: bool) -> Result<Bytes, Error> {
        if !skip_local && let Some(local) = &self.local {
            if let Some(bytes) = local.get(key) {
                self.stats.hit();
                self.stats.local_hit();
                if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
                    return Err(Error::NotFound);
                }
                return Ok(bytes);
            }
            self.stats.local_miss();
        }

        let Some(remote) = &self.remote else {
            if self.local.is_none() {
                return Err(Error::TiersUnconfigured);
            }
            self.stats.miss();
            return Err(Error::CacheMiss);
        };

        match remote.get(key).await {
            Ok(Some(bytes)) => {
                self.stats.hit();
                self.stats.remote_hit();
                if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
                    return Err(Error::NotFound);
                }
                if !skip_local && let Some(local) = &self.local {
                    local.set(key, bytes.clone());
                }
                Ok(bytes)
            }
            Ok(None) => {
                self.stats.miss();
                self.stats.remote_miss();
                Err(Error::CacheMiss)
            }
            Err(e) => {
                self.stats.miss();
                self.stats.remote_miss();
                Err(e.into())
            }
        }
    }

    pub(crate) async fn get_value<T: DeserializeOwned>(&self, key: &str, skip_local: bool) -> Result<T, Error> {
        if self.local.is_none() && self.remote.is_none() {
            return Err(Error::TiersUnconfigured);
        }
        let bytes = self.get_bytes(key, skip_local).await?;
        match self.codec.decode(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                // An L1 payload an older codec wrote: drop it and take the
                // remote path once.
                if !skip_local && self.local.is_some() && self.remote.is_some() {
                    if let Some(local) = &self.local {
                        local.del(key);
                    }
                    let bytes = self.get_bytes(key, false).await?;
                    self.codec.decode(&bytes)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Computes the byte payload an item describes: the loader's result if
    /// present, else the provided value. `Ok(None)` means "no entity".
    async fn compute_item_bytes<T: Serialize>(&self, item: &Item<T>) -> Result<Option<Bytes>, Error> {
        if let Some(loader) = &item.loader {
            self.stats.query();
            match loader.load().await {
                Ok(Some(value)) => Ok(Some(self.codec.encode(&value)?)),
                Ok(None) => Ok(None),
                Err(e) => {
                    let error = Error::loader(e);
                    self.stats.query_fail(&error);
                    Err(error)
                }
            }
        } else if let Some(value) = &item.value {
            Ok(Some(self.codec.encode(value)?))
        } else {
            Ok(None)
        }
    }

    /// Writes a payload (or the placeholder, for `None`) to the configured
    /// tiers: L1 first, then the remote tier under `remote_ttl`.
    pub(crate) async fn apply_write(
        &self,
        key: &str,
        bytes: Option<Bytes>,
        flags: WriteFlags,
        remote_ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let Some(bytes) = bytes else {
            if let Err(e) = self.write_placeholder(key, flags.skip_local).await {
                tracing::error!(cache = %self.name, key = %key, error = %e, "placeholder write failed");
            }
            return Ok(());
        };

        if !flags.skip_local && let Some(local) = &self.local {
            local.set(key, bytes.clone());
        }

        let Some(remote) = &self.remote else {
            return Ok(());
        };
        let Some(ttl) = remote_ttl else {
            return Ok(());
        };

        if flags.set_xx {
            remote.set_xx(key, bytes, ttl).await?;
        } else if flags.set_nx {
            remote.set_nx(key, bytes, ttl).await?;
        } else {
            remote.set_ex(key, bytes, ttl).await?;
        }
        Ok(())
    }

    /// Caches the negative answer under a short, jittered expiry.
    pub(crate) async fn write_placeholder(&self, key: &str, skip_local: bool) -> Result<(), Error> {
        if !skip_local && let Some(local) = &self.local {
            local.set(key, Bytes::from_static(NOT_FOUND_PLACEHOLDER));
        }
        let Some(remote) = &self.remote else {
            return Ok(());
        };
        let ttl = self.not_found_expiry + self.placeholder_jitter();
        remote.set_ex(key, Bytes::from_static(NOT_FOUND_PLACEHOLDER), ttl).await?;
        Ok(())
    }

    pub(crate) async fn set_item<T: Serialize>(&self, item: &Item<T>, event: EventType) -> Result<(), Error> {
        if self.local.is_none() && self.remote.is_none() {
            return Err(Error::TiersUnconfigured);
        }
        let bytes = self.compute_item_bytes(item).await?;
        let flags = WriteFlags {
            set_xx: item.set_xx,
            set_nx: item.set_nx,
            skip_local: item.skip_local,
        };
        let ttl = self.effective_remote_ttl(item.ttl, item.local_only, &item.key);
        self.apply_write(&item.key, bytes, flags, ttl).await?;
        self.emit(event, vec![item.key.clone()]);
        Ok(())
    }

    /// The `once` byte path: L1 probe, then single-flight over
    /// lookup-or-load. The second tuple element is true when the bytes came
    /// from a tier rather than a fresh loader execution; only tier bytes
    /// are eligible for the decode self-heal.
    pub(crate) async fn once_bytes<T: Serialize>(&self, item: &Item<T>) -> Result<(Bytes, bool), Error> {
        if !item.skip_local
            && let Some(local) = &self.local
            && let Some(bytes) = local.get(&item.key)
        {
            self.stats.hit();
            self.stats.local_hit();
            if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
                return Err(Error::NotFound);
            }
            return Ok((bytes, true));
        }

        let cached = AtomicBool::new(false);
        let (outcome, _led) = self
            .group
            .execute(&item.key, || async {
                match self.get_bytes(&item.key, item.skip_local).await {
                    Ok(bytes) => {
                        cached.store(true, Ordering::Relaxed);
                        Ok(bytes)
                    }
                    Err(Error::NotFound) => {
                        cached.store(true, Ordering::Relaxed);
                        Err(Error::NotFound)
                    }
                    Err(Error::CacheMiss) => self.load_and_write(item).await,
                    Err(e) => Err(e),
                }
            })
            .await;

        outcome.map(|bytes| (bytes, cached.load(Ordering::Relaxed)))
    }

    /// The miss path inside the single-flight critical section.
    async fn load_and_write<T: Serialize>(&self, item: &Item<T>) -> Result<Bytes, Error> {
        let bytes = self.compute_item_bytes(item).await?;
        let flags = WriteFlags {
            set_xx: item.set_xx,
            set_nx: item.set_nx,
            skip_local: item.skip_local,
        };
        let ttl = self.effective_remote_ttl(item.ttl, item.local_only, &item.key);
        match self.apply_write(&item.key, bytes.clone(), flags, ttl).await {
            Ok(()) => {
                self.emit(EventType::SetByOnce, vec![item.key.clone()]);
            }
            Err(e) => {
                // The value is already computed; a failed write-back must
                // not fail the read.
                tracing::warn!(cache = %self.name, key = %item.key, error = %e, "write-back failed, serving loaded value");
            }
        }
        match bytes {
            Some(bytes) => Ok(bytes),
            None => Err(Error::NotFound),
        }
    }
}
