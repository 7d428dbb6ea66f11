// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two tiers: moka in-process L1 plus Redis L2, with async refresh keeping a
//! hot key warm and invalidation events for peer processes.
//!
//! Requires a Redis listening on 127.0.0.1:6379:
//!
//! ```sh
//! cargo run --example multi_tier --features redis
//! ```

use std::time::Duration;

use duocache::{Cache, Item};
use duocache_memory::InMemoryTier;
use duocache_redis::RedisRemote;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let cache = Cache::builder()
        .name("catalog")
        .local(
            InMemoryTier::builder()
                .max_capacity(50_000)
                .time_to_live(Duration::from_secs(60))
                .build(),
        )
        .remote(RedisRemote::from_url("redis://127.0.0.1:6379")?)
        .remote_expiry(Duration::from_secs(3600))
        .refresh_duration(Duration::from_secs(5))
        .stop_refresh_after_last_access(Duration::from_secs(60))
        .sync_local()
        .event_handler(|event| {
            // A real consumer publishes this over pub/sub and peers apply it
            // with `delete_from_local`, skipping their own source_id.
            println!("event: {:?} keys={:?} from={}", event.event_type, event.keys, event.source_id);
        })
        .build()?;

    // Enrol the key into the refresh engine; every 5 s one process re-runs
    // the loader while the others copy the fresh value out of Redis.
    let price: f64 = cache
        .once(Item::new("price:widget").refresh().loader(|| async {
            Ok::<_, std::io::Error>(Some(9.99_f64))
        }))
        .await?;
    println!("price = {price}");

    // Bulk lookup across both tiers with one fallback call.
    let rows = cache
        .mget(
            "sku",
            &[1u64, 2, 3],
            Some(|ids: Vec<u64>| async move {
                Ok(ids.into_iter().map(|id| (id, format!("sku-{id}"))).collect())
            }),
        )
        .await;
    println!("mget -> {rows:?}");

    tokio::time::sleep(Duration::from_secs(12)).await;
    println!("refresh tasks alive: {}", cache.task_count());

    cache.close();
    Ok(())
}
