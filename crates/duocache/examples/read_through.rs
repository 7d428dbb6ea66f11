// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Read-through caching with negative caching of "not found".

use std::time::Duration;

use duocache::{Cache, Error, Item};
use duocache_memory::InMemoryTier;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct User {
    id: u64,
    name: String,
}

async fn fetch_user(id: u64) -> Result<Option<User>, std::io::Error> {
    // Stand-in for a database read.
    if id == 42 {
        Ok(Some(User {
            id,
            name: "alice".to_owned(),
        }))
    } else {
        Ok(None)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let cache = Cache::builder()
        .name("users")
        .local(
            InMemoryTier::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60))
                .build(),
        )
        .build()?;

    // First read runs the loader; the second is served from L1.
    let user: User = cache
        .once(Item::new("user:42").loader(|| fetch_user(42)))
        .await?;
    println!("loaded {user:?}");

    let user: User = cache
        .once(Item::new("user:42").loader(|| fetch_user(42)))
        .await?;
    println!("cached {user:?}");

    // A loader answering "no entity" is negative-cached: the follow-up read
    // short-circuits without calling the loader again.
    let missing: Result<User, Error> = cache.once(Item::new("user:7").loader(|| fetch_user(7))).await;
    match missing {
        Err(Error::NotFound) => println!("user 7 does not exist (now cached as such)"),
        other => println!("unexpected: {other:?}"),
    }

    println!("stats: {:?}", cache.stats());
    Ok(())
}
