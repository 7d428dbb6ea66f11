// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process memory tier backed by moka.
//!
//! This crate provides [`InMemoryTier`], a [`LocalTier`](duocache_tier::LocalTier)
//! implementation with:
//! - Concurrent access with high performance
//! - Automatic eviction based on capacity (`TinyLFU` policy)
//! - A configured base TTL with bounded random jitter per entry, so that a
//!   burst of writes does not expire in one synchronized wave
//!
//! # Examples
//!
//! ```
//! use duocache_memory::InMemoryTier;
//! use duocache_tier::LocalTier;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let tier = InMemoryTier::builder()
//!     .max_capacity(10_000)
//!     .time_to_live(Duration::from_secs(60))
//!     .build();
//!
//! tier.set("key", Bytes::from_static(b"value"));
//! assert_eq!(tier.get("key"), Some(Bytes::from_static(b"value")));
//! ```

mod builder;
mod tier;

pub use builder::InMemoryTierBuilder;
pub use tier::InMemoryTier;
