// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The deadpool-backed adapter implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use duocache_tier::{RemoteError, RemoteTier};
use redis::AsyncCommands;

/// A [`RemoteTier`] backed by a Redis connection pool.
///
/// Conditional writes map to `SET ... NX` / `SET ... XX`; expiry is always
/// passed as `PX` so sub-second TTLs survive. [`mset`](RemoteTier::mset) is
/// a pipeline of expiring `SET`s because `MSET` itself cannot carry a TTL.
#[derive(Clone)]
pub struct RedisRemote {
    pool: Pool,
}

impl std::fmt::Debug for RedisRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRemote").finish_non_exhaustive()
    }
}

impl RedisRemote {
    /// Creates an adapter over an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates an adapter with a fresh pool for the given Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed or the pool cannot be
    /// configured. No connection is attempted until the first operation.
    pub fn from_url(url: impl Into<String>) -> Result<Self, RemoteError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(RemoteError::from_source)?;
        Ok(Self { pool })
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<Connection, RemoteError> {
        self.pool.get().await.map_err(RemoteError::from_source)
    }
}

/// Expiry in whole milliseconds, floored at one so `PX 0` never reaches the
/// server.
fn px(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl RemoteTier for RedisRemote {
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), RemoteError> {
        let mut conn = self.conn().await?;
        let () = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("PX")
            .arg(px(ttl))
            .query_async(&mut conn)
            .await
            .map_err(RemoteError::from_source)?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("PX")
            .arg(px(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(RemoteError::from_source)?;
        Ok(reply.is_some())
    }

    async fn set_xx(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, RemoteError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("PX")
            .arg(px(ttl))
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(RemoteError::from_source)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(RemoteError::from_source)?;
        Ok(value.map(Bytes::from))
    }

    async fn del(&self, key: &str) -> Result<u64, RemoteError> {
        let mut conn = self.conn().await?;
        conn.del(key).await.map_err(RemoteError::from_source)
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, RemoteError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.conn().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(RemoteError::from_source)?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), Bytes::from(v))))
            .collect())
    }

    async fn mset(&self, values: HashMap<String, Bytes>, ttl: Duration) -> Result<(), RemoteError> {
        if values.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for (key, value) in &values {
            pipe.cmd("SET").arg(key).arg(&value[..]).arg("PX").arg(px(ttl)).ignore();
        }
        let () = pipe.query_async(&mut conn).await.map_err(RemoteError::from_source)?;
        Ok(())
    }
}
