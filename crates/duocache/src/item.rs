// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-call request descriptors.
//!
//! An [`Item`] carries the key plus everything one `set`/`once` call may
//! customize: the value or loader that produces it, the remote TTL,
//! conditional-write flags, L1 bypass, and refresh enrolment.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::{Error, LoadError};

/// A loader invoked on cache miss.
///
/// Returning `Ok(None)` means "no entity exists for this key": the cache
/// writes the negative-cache placeholder and the caller sees
/// [`Error::NotFound`]. Errors are propagated to the caller and are not
/// cached.
pub struct Loader<T> {
    func: Arc<dyn Fn() -> BoxFuture<'static, Result<Option<T>, LoadError>> + Send + Sync>,
}

impl<T> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<T> std::fmt::Debug for Loader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

impl<T> Loader<T> {
    /// Wraps a closure as a loader.
    pub fn new<F, Fut, E>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Into<LoadError>,
    {
        Self {
            func: Arc::new(move || {
                let fut = f();
                Box::pin(async move { fut.await.map_err(Into::into) })
            }),
        }
    }

    pub(crate) fn load(&self) -> BoxFuture<'static, Result<Option<T>, LoadError>> {
        (self.func)()
    }
}

impl<T: Serialize + Send + 'static> Loader<T> {
    /// Binds this loader to a codec, producing the byte-level loader the
    /// refresh engine stores. Encoding happens here, once, so everything
    /// past the coordinator boundary deals in bytes.
    pub(crate) fn bind(&self, codec: Codec) -> ByteLoader {
        let func = Arc::clone(&self.func);
        ByteLoader {
            func: Arc::new(move || {
                let fut = func();
                Box::pin(async move {
                    match fut.await {
                        Ok(Some(value)) => codec.encode(&value).map(Some),
                        Ok(None) => Ok(None),
                        Err(e) => Err(Error::loader(e)),
                    }
                })
            }),
        }
    }
}

/// A loader whose output is already encoded. `Ok(None)` keeps its
/// "no entity" meaning.
pub(crate) struct ByteLoader {
    func: Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Bytes>, Error>> + Send + Sync>,
}

impl Clone for ByteLoader {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl ByteLoader {
    pub(crate) fn load(&self) -> BoxFuture<'static, Result<Option<Bytes>, Error>> {
        (self.func)()
    }
}

/// A per-call request descriptor.
///
/// # Examples
///
/// ```
/// use duocache::Item;
/// use std::time::Duration;
///
/// let item = Item::new("user:42")
///     .ttl(Duration::from_secs(600))
///     .loader(|| async { Ok::<_, std::io::Error>(Some("alice".to_owned())) })
///     .refresh();
/// assert_eq!(item.key(), "user:42");
/// ```
#[derive(Debug)]
pub struct Item<T> {
    pub(crate) key: String,
    pub(crate) value: Option<T>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) local_only: bool,
    pub(crate) loader: Option<Loader<T>>,
    pub(crate) set_xx: bool,
    pub(crate) set_nx: bool,
    pub(crate) skip_local: bool,
    pub(crate) refresh: bool,
}

impl<T> Item<T> {
    /// Creates a descriptor for `key` with defaults everywhere else.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            ttl: None,
            local_only: false,
            loader: None,
            set_xx: false,
            set_nx: false,
            skip_local: false,
            refresh: false,
        }
    }

    /// Returns the key this descriptor addresses.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Sets the value to store.
    #[must_use]
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Sets the remote TTL for this write.
    ///
    /// Zero or unset means the cache's default remote expiry. Sub-second
    /// TTLs are snapped to the default with a warning at write time.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Keeps this write out of the remote tier entirely.
    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    /// Sets the loader invoked on miss. See [`Loader`].
    #[must_use]
    pub fn loader<F, Fut, E>(self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Into<LoadError>,
    {
        self.with_loader(Loader::new(f))
    }

    /// Sets a pre-built loader.
    #[must_use]
    pub fn with_loader(mut self, loader: Loader<T>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Only writes the remote key if it already exists.
    #[must_use]
    pub fn set_xx(mut self) -> Self {
        self.set_xx = true;
        self
    }

    /// Only writes the remote key if it does not already exist.
    #[must_use]
    pub fn set_nx(mut self) -> Self {
        self.set_nx = true;
        self
    }

    /// Bypasses the local tier for this call.
    #[must_use]
    pub fn skip_local(mut self) -> Self {
        self.skip_local = true;
        self
    }

    /// Enrols this key into the asynchronous refresh engine.
    ///
    /// Requires a loader; without one there is nothing to refresh with.
    #[must_use]
    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }
}
