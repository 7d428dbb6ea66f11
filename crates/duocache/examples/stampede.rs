// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates single-flight coalescing: many concurrent readers of a cold
//! key trigger exactly one loader execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use duocache::{Cache, Item};
use duocache_memory::InMemoryTier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cache = Cache::builder()
        .name("stampede")
        .local(InMemoryTier::with_capacity(1000))
        .build()?;

    let loads = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for reader in 0..64 {
        let cache = cache.clone();
        let loads = Arc::clone(&loads);
        handles.push(tokio::spawn(async move {
            let value: String = cache
                .once(Item::new("hot-key").loader(move || {
                    let loads = Arc::clone(&loads);
                    async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        // A slow backend call.
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, std::io::Error>(Some("expensive".to_owned()))
                    }
                }))
                .await
                .expect("load succeeds");
            (reader, value)
        }));
    }

    for handle in handles {
        let (reader, value) = handle.await?;
        assert_eq!(value, "expensive");
        let _ = reader;
    }

    println!("64 readers, {} loader execution(s)", loads.load(Ordering::SeqCst));
    println!("queries recorded: {}", cache.stats().query);
    Ok(())
}
