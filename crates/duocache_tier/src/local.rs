// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The in-process (L1) tier contract.

use bytes::Bytes;

/// Contract for the in-process memory tier.
///
/// Implementations must be safe for concurrent use from arbitrary threads.
/// Lookups are synchronous: an L1 probe sits on the hot read path and must
/// not block on I/O.
///
/// TTL and eviction are internal to the implementation. Callers do not pass
/// a per-write TTL; the tier applies its own configured base TTL (plus any
/// jitter) to every write.
pub trait LocalTier: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Bytes);

    /// Returns the value stored under `key`, or `None` if the key is absent
    /// or expired.
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Removes `key`. Removing an absent key is a no-op.
    fn del(&self, key: &str);
}

impl<T: LocalTier + ?Sized> LocalTier for std::sync::Arc<T> {
    fn set(&self, key: &str, value: Bytes) {
        (**self).set(key, value);
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        (**self).get(key)
    }

    fn del(&self, key: &str) {
        (**self).del(key);
    }
}
