// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two-tier read-through caching with single-flight loading, negative
//! caching, asynchronous refresh, and bulk lookup.
//!
//! This crate composes an in-process memory tier (L1) with a shared remote
//! key-value store (L2, e.g. Redis) behind one API:
//!
//! - [`Cache::once`]: the hot read path: tiered lookup, per-key
//!   deduplication of concurrent misses, negative caching of "not found",
//!   and write-back to both tiers.
//! - The refresh engine, which keeps enrolled keys warm by re-running their
//!   loader every tick, coordinating across processes through an advisory
//!   lock in the remote tier.
//! - [`Cache::mget`]: bulk lookup for `{prefix, id}` key families with a
//!   single fallback call to a bulk loader.
//! - Invalidation events: typed write notifications peer processes use to
//!   drop stale L1 entries.
//!
//! Consistency between the tiers is eventual: writes go to L1 first, then
//! L2, and a failure in between is not rolled back.
//!
//! # Examples
//!
//! ## Read-through with negative caching
//!
//! ```
//! use duocache::{Cache, Error, Item};
//! use duocache_memory::InMemoryTier;
//!
//! # futures::executor::block_on(async {
//! let cache = Cache::builder()
//!     .name("users")
//!     .local(InMemoryTier::with_capacity(10_000))
//!     .build()?;
//!
//! // Miss: the loader runs once, concurrent duplicates wait and share.
//! let name: String = cache
//!     .once(Item::new("user:42").loader(|| async {
//!         Ok::<_, std::io::Error>(Some("alice".to_owned()))
//!     }))
//!     .await?;
//! assert_eq!(name, "alice");
//!
//! // A loader answering `None` is negative-cached: the next read returns
//! // `Error::NotFound` without running any loader.
//! let missing = cache
//!     .once(Item::new("user:404").loader(|| async {
//!         Ok::<_, std::io::Error>(None::<String>)
//!     }))
//!     .await;
//! assert!(matches!(missing, Err(Error::NotFound)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! ## Two tiers
//!
//! ```no_run
//! use duocache::Cache;
//! use duocache_memory::InMemoryTier;
//! use duocache_redis::RedisRemote;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Cache::builder()
//!     .name("catalog")
//!     .local(InMemoryTier::builder().max_capacity(50_000).time_to_live(Duration::from_secs(60)).build())
//!     .remote(RedisRemote::from_url("redis://127.0.0.1:6379")?)
//!     .remote_expiry(Duration::from_secs(3600))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod cache;
mod codec;
mod error;
mod events;
mod group;
mod item;
pub mod keys;
mod mget;
mod refresh;
pub mod stats;
mod util;

pub use builder::Builder;
pub use cache::{Cache, CacheType, NOT_FOUND_PLACEHOLDER};
pub use codec::Codec;
pub use error::{ConfigError, Error, LoadError};
pub use events::{Event, EventHandler, EventType};
pub use group::FlightGroup;
pub use item::{Item, Loader};

#[cfg(feature = "memory")]
#[doc(inline)]
pub use duocache_memory::InMemoryTier;
#[cfg(feature = "redis")]
#[doc(inline)]
pub use duocache_redis::RedisRemote;
#[doc(inline)]
pub use duocache_tier::{LocalTier, RemoteError, RemoteTier};

#[cfg(feature = "test-util")]
#[doc(inline)]
pub use duocache_tier::testing::{MockLocal, MockRemote};
