// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::error::Error as StdError;
use std::sync::Arc;

use duocache_tier::RemoteError;

/// The boxed error type loaders may fail with.
pub type LoadError = Box<dyn StdError + Send + Sync>;

/// An error from a cache operation.
///
/// The enum is `Clone` (sources are `Arc`-wrapped) so a single outcome can
/// be fanned out to every waiter of a coalesced load.
///
/// Two variants deserve care:
///
/// - [`Error::CacheMiss`]: the tiered lookup came up empty. `get` surfaces
///   it; `once` consumes it internally as the signal to invoke the loader.
/// - [`Error::NotFound`]: the positive signal that the loader said "this
///   key has no corresponding entity". It is served from the negative-cache
///   placeholder without touching the loader again.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The tiered lookup came up empty.
    #[error("cache: key is missing")]
    CacheMiss,

    /// The loader reported that no entity exists for this key.
    #[error("cache: entity not found")]
    NotFound,

    /// Neither a local nor a remote tier is configured.
    #[error("cache: both remote and local tiers are unconfigured")]
    TiersUnconfigured,

    /// Encoding or decoding a value failed.
    #[error("cache: codec: {0}")]
    Codec(Arc<dyn StdError + Send + Sync>),

    /// The remote tier failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The loader failed.
    #[error("cache: loader: {0}")]
    Loader(Arc<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn codec(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Codec(Arc::new(source))
    }

    pub(crate) fn loader(source: LoadError) -> Self {
        Self::Loader(Arc::from(source))
    }

    /// Returns `true` for the positive "entity does not exist" signal.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` when the tiered lookup simply came up empty.
    #[must_use]
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss)
    }
}

/// A configuration rejected at construction time.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The codec name does not resolve to a registered codec.
    #[error("config: unknown codec {0:?}")]
    UnknownCodec(String),

    /// The event channel capacity must be positive.
    #[error("config: event channel capacity must be positive")]
    ZeroEventCapacity,

    /// The refresh concurrency must be positive.
    #[error("config: refresh concurrency must be positive")]
    ZeroRefreshConcurrency,

    /// Local-cache sync events need both tiers to be meaningful.
    #[error("config: sync_local requires both a local and a remote tier")]
    SyncLocalRequiresBothTiers,
}
