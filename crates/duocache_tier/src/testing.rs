// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock tier implementations for testing.
//!
//! This module provides [`MockRemote`] and [`MockLocal`], in-memory tiers
//! that record every operation and support failure injection for testing
//! error paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{LocalTier, RemoteError, RemoteTier};

/// Recorded remote tier operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// An unconditional expiring set.
    SetEx {
        /// The key that was written.
        key: String,
        /// The expiry passed by the caller.
        ttl: Duration,
    },
    /// A set applied only when the key was absent.
    SetNx {
        /// The key that was written.
        key: String,
        /// The expiry passed by the caller.
        ttl: Duration,
    },
    /// A set applied only when the key was present.
    SetXx {
        /// The key that was written.
        key: String,
        /// The expiry passed by the caller.
        ttl: Duration,
    },
    /// A single-key read.
    Get(String),
    /// A single-key delete.
    Del(String),
    /// A bulk read.
    MGet(Vec<String>),
    /// A bulk expiring write.
    MSet {
        /// The keys that were written, sorted.
        keys: Vec<String>,
        /// The expiry passed by the caller.
        ttl: Duration,
    },
}

type FailPredicate = Box<dyn Fn(&RemoteOp) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct Stored {
    value: Bytes,
    ttl: Duration,
}

/// A configurable mock remote tier.
///
/// Stores values in memory, records every operation (with the TTL the
/// caller passed), and can be configured to fail operations on demand.
/// Entries never expire on their own; assert on [`ttl_of`](Self::ttl_of)
/// instead of waiting.
///
/// # Examples
///
/// ```
/// use duocache_tier::{RemoteTier, testing::{MockRemote, RemoteOp}};
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// # futures::executor::block_on(async {
/// let remote = MockRemote::new();
/// remote.set_ex("k", Bytes::from_static(b"v"), Duration::from_secs(60)).await?;
///
/// assert_eq!(remote.get("k").await?, Some(Bytes::from_static(b"v")));
/// assert_eq!(remote.ttl_of("k"), Some(Duration::from_secs(60)));
/// # Ok::<(), duocache_tier::RemoteError>(())
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockRemote {
    data: Arc<Mutex<HashMap<String, Stored>>>,
    operations: Arc<Mutex<Vec<RemoteOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("data", &self.data.lock().len())
            .field("operations", &self.operations.lock().len())
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockRemote {
    /// Creates a new empty mock remote tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures operations matching `predicate` to fail with a transport
    /// error.
    pub fn fail_when(&self, predicate: impl Fn(&RemoteOp) -> bool + Send + Sync + 'static) {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears any configured failure predicate.
    pub fn fail_never(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns all recorded operations in order.
    #[must_use]
    pub fn operations(&self) -> Vec<RemoteOp> {
        self.operations.lock().clone()
    }

    /// Returns the stored value for `key`, bypassing recording.
    #[must_use]
    pub fn value_of(&self, key: &str) -> Option<Bytes> {
        self.data.lock().get(key).map(|s| s.value.clone())
    }

    /// Returns the TTL the last write to `key` carried.
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.data.lock().get(key).map(|s| s.ttl)
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Removes `key` directly, bypassing recording. Useful for simulating
    /// expiry in tests.
    pub fn expire_now(&self, key: &str) {
        self.data.lock().remove(key);
    }

    fn check(&self, op: &RemoteOp) -> Result<(), RemoteError> {
        self.operations.lock().push(op.clone());
        if let Some(predicate) = &*self.fail_when.lock()
            && predicate(op)
        {
            return Err(RemoteError::from_message(format!("injected failure for {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTier for MockRemote {
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), RemoteError> {
        self.check(&RemoteOp::SetEx {
            key: key.to_owned(),
            ttl,
        })?;
        self.data.lock().insert(key.to_owned(), Stored { value, ttl });
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError> {
        self.check(&RemoteOp::SetNx {
            key: key.to_owned(),
            ttl,
        })?;
        let mut data = self.data.lock();
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_owned(), Stored { value, ttl });
        Ok(true)
    }

    async fn set_xx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError> {
        self.check(&RemoteOp::SetXx {
            key: key.to_owned(),
            ttl,
        })?;
        let mut data = self.data.lock();
        if !data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_owned(), Stored { value, ttl });
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError> {
        self.check(&RemoteOp::Get(key.to_owned()))?;
        Ok(self.data.lock().get(key).map(|s| s.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<u64, RemoteError> {
        self.check(&RemoteOp::Del(key.to_owned()))?;
        Ok(u64::from(self.data.lock().remove(key).is_some()))
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, RemoteError> {
        self.check(&RemoteOp::MGet(keys.to_vec()))?;
        let data = self.data.lock();
        Ok(keys
            .iter()
            .filter_map(|key| data.get(key).map(|s| (key.clone(), s.value.clone())))
            .collect())
    }

    async fn mset(&self, values: HashMap<String, Bytes>, ttl: Duration) -> Result<(), RemoteError> {
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        self.check(&RemoteOp::MSet { keys, ttl })?;
        let mut data = self.data.lock();
        for (key, value) in values {
            data.insert(key, Stored { value, ttl });
        }
        Ok(())
    }
}

/// A plain in-memory local tier for tests.
///
/// Never expires entries; exposes its size for assertions.
#[derive(Clone, Default)]
pub struct MockLocal {
    data: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl std::fmt::Debug for MockLocal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLocal").field("len", &self.data.lock().len()).finish()
    }
}

impl MockLocal {
    /// Creates a new empty mock local tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl LocalTier for MockLocal {
    fn set(&self, key: &str, value: Bytes) {
        self.data.lock().insert(key.to_owned(), value);
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.data.lock().get(key).cloned()
    }

    fn del(&self, key: &str) {
        self.data.lock().remove(key);
    }
}
