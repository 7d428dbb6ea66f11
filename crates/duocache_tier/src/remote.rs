// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared remote (L2) tier contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::RemoteError;

/// Contract for the shared remote tier.
///
/// Key absence is a normal outcome, expressed as `Ok(None)` (or an omitted
/// entry for [`mget`](RemoteTier::mget)); [`RemoteError`] is reserved for
/// transport and server failures. Implementations must be safe for
/// concurrent use.
///
/// All operations take the caller's cancellation scope implicitly: dropping
/// the returned future abandons the request.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Sets `key` to `value` with the given expiry, unconditionally.
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), RemoteError>;

    /// Sets `key` only if it does not already exist.
    ///
    /// Returns `true` if the write was applied.
    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError>;

    /// Sets `key` only if it already exists.
    ///
    /// Returns `true` if the write was applied.
    async fn set_xx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError>;

    /// Returns the value stored under `key`, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError>;

    /// Deletes `key`, returning the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64, RemoteError>;

    /// Returns the values for `keys`. Absent keys are omitted from the map.
    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, RemoteError>;

    /// Sets every entry of `values`, each with the given expiry.
    async fn mset(&self, values: HashMap<String, Bytes>, ttl: Duration) -> Result<(), RemoteError>;
}

#[async_trait]
impl<T: RemoteTier + ?Sized> RemoteTier for std::sync::Arc<T> {
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), RemoteError> {
        (**self).set_ex(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError> {
        (**self).set_nx(key, value, ttl).await
    }

    async fn set_xx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError> {
        (**self).set_xx(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError> {
        (**self).get(key).await
    }

    async fn del(&self, key: &str) -> Result<u64, RemoteError> {
        (**self).del(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, RemoteError> {
        (**self).mget(keys).await
    }

    async fn mset(&self, values: HashMap<String, Bytes>, ttl: Duration) -> Result<(), RemoteError> {
        (**self).mset(values, ttl).await
    }
}
