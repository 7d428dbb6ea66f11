// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Redis remote tier for the duocache two-tier cache.
//!
//! [`RedisRemote`] adapts a `deadpool-redis` connection pool to the
//! [`RemoteTier`](duocache_tier::RemoteTier) contract. All writes carry an
//! explicit expiry (`SET ... PX`, millisecond precision); bulk writes are
//! pipelined so each key gets its own TTL.
//!
//! # Examples
//!
//! ```no_run
//! use duocache_redis::RedisRemote;
//!
//! # fn main() -> Result<(), duocache_tier::RemoteError> {
//! let remote = RedisRemote::from_url("redis://127.0.0.1:6379")?;
//! # Ok(())
//! # }
//! ```

mod remote;

pub use remote::RedisRemote;
