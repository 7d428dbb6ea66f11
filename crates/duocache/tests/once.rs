// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the `once` read-through path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use duocache::{Cache, Error, Item, LocalTier, NOT_FOUND_PLACEHOLDER};
use duocache_tier::testing::{MockLocal, MockRemote};

fn both_tier_cache() -> (Cache, MockLocal, MockRemote) {
    let local = MockLocal::new();
    let remote = MockRemote::new();
    let cache = Cache::builder()
        .name("once-test")
        .local(local.clone())
        .remote(remote.clone())
        .build()
        .unwrap();
    (cache, local, remote)
}

#[tokio::test(start_paused = true)]
async fn concurrent_once_calls_share_one_loader_execution() {
    let (cache, _, _) = both_tier_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let cache = cache.clone();
        let invocations = Arc::clone(&invocations);
        handles.push(tokio::spawn(async move {
            cache
                .once(Item::new("k").loader(move || {
                    let invocations = Arc::clone(&invocations);
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err::<Option<String>, _>("stub".to_owned())
                    }
                }))
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        match result {
            Err(Error::Loader(e)) => assert!(e.to_string().contains("stub")),
            other => panic!("expected a loader error, got {other:?}"),
        }
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().query, 1);
}

#[tokio::test]
async fn loader_not_found_is_negative_cached() {
    let (cache, local, remote) = both_tier_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    let loader_item = |invocations: &Arc<AtomicUsize>| {
        let invocations = Arc::clone(invocations);
        Item::new("k").loader(move || {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(None::<String>)
            }
        })
    };

    let result = cache.once(loader_item(&invocations)).await;
    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(remote.value_of("k"), Some(Bytes::from_static(NOT_FOUND_PLACEHOLDER)));
    assert_eq!(local.get("k"), Some(Bytes::from_static(NOT_FOUND_PLACEHOLDER)));

    // Served from the placeholder: the loader does not run again.
    let result = cache.once(loader_item(&invocations)).await;
    assert!(matches!(result, Err(Error::NotFound)));
    let result: Result<String, Error> = cache.get("k").await;
    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn placeholder_ttl_stays_within_the_jitter_window() {
    let local = MockLocal::new();
    let remote = MockRemote::new();
    let cache = Cache::builder()
        .local(local)
        .remote(remote.clone())
        .not_found_expiry(Duration::from_secs(60))
        .build()
        .unwrap();

    for i in 0..32 {
        let key = format!("missing:{i}");
        let _ = cache
            .once(Item::new(&key).loader(|| async { Ok::<_, std::io::Error>(None::<String>) }))
            .await;
        let ttl = remote.ttl_of(&key).unwrap();
        assert!(ttl >= Duration::from_secs(60), "ttl {ttl:?} below the base expiry");
        assert!(ttl < Duration::from_secs(66), "ttl {ttl:?} beyond base plus offset");
    }
}

#[tokio::test]
async fn local_only_ttl_suppresses_the_remote_write() {
    let (cache, local, remote) = both_tier_cache();

    let value: String = cache
        .once(
            Item::new("k")
                .local_only()
                .loader(|| async { Ok::<_, std::io::Error>(Some("hello".to_owned())) }),
        )
        .await
        .unwrap();

    assert_eq!(value, "hello");
    assert!(local.get("k").is_some());
    assert_eq!(remote.value_of("k"), None);
    assert!(!remote.operations().iter().any(|op| matches!(
        op,
        duocache_tier::testing::RemoteOp::SetEx { key, .. } if key == "k"
    )));
}

#[tokio::test]
async fn once_prefers_a_warm_local() {
    let (cache, _, _) = both_tier_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    cache.set(Item::new("k").value("warm".to_owned())).await.unwrap();

    let counted = Arc::clone(&invocations);
    let value: String = cache
        .once(Item::new("k").loader(move || {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(Some("cold".to_owned()))
            }
        }))
        .await
        .unwrap();

    assert_eq!(value, "warm");
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn once_falls_back_to_remote_before_the_loader() {
    let (cache, local, _) = both_tier_cache();

    cache.set(Item::new("k").value("remote".to_owned())).await.unwrap();
    local.del("k");

    let value: String = cache
        .once(Item::new("k").loader(|| async { Ok::<_, std::io::Error>(Some("loaded".to_owned())) }))
        .await
        .unwrap();
    assert_eq!(value, "remote");
    // The remote hit warmed the local tier back up.
    assert!(local.get("k").is_some());
}

#[tokio::test]
async fn once_heals_undecodable_cached_bytes() {
    let (cache, local, remote) = both_tier_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    local.set("k", Bytes::from_static(b"\xc1corrupt"));
    remote.expire_now("k");

    let counted = Arc::clone(&invocations);
    let value: String = cache
        .once(Item::new("k").loader(move || {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(Some("fresh".to_owned()))
            }
        }))
        .await
        .unwrap();

    assert_eq!(value, "fresh");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    // The healed bytes decode from either tier now.
    let decoded: String = cache.get("k").await.unwrap();
    assert_eq!(decoded, "fresh");
}

#[tokio::test]
async fn once_with_a_value_writes_through() {
    let (cache, _, remote) = both_tier_cache();

    let value: String = cache.once(Item::new("k").value("pinned".to_owned())).await.unwrap();
    assert_eq!(value, "pinned");
    assert!(remote.value_of("k").is_some());
}

#[tokio::test]
async fn once_without_value_or_loader_is_not_found() {
    let (cache, _, remote) = both_tier_cache();

    let result: Result<String, Error> = cache.once(Item::new("k")).await;
    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(remote.value_of("k"), Some(Bytes::from_static(NOT_FOUND_PLACEHOLDER)));
}

#[tokio::test]
async fn once_serves_the_loaded_value_when_write_back_fails() {
    let (cache, _, remote) = both_tier_cache();
    remote.fail_when(|op| matches!(op, duocache_tier::testing::RemoteOp::SetEx { .. }));

    let value: String = cache
        .once(Item::new("k").loader(|| async { Ok::<_, std::io::Error>(Some("survives".to_owned())) }))
        .await
        .unwrap();
    assert_eq!(value, "survives");
}

#[tokio::test]
async fn once_with_no_tiers_is_rejected() {
    let cache = Cache::builder().build().unwrap();
    let result: Result<String, Error> = cache
        .once(Item::new("k").loader(|| async { Ok::<_, std::io::Error>(Some("v".to_owned())) }))
        .await;
    assert!(matches!(result, Err(Error::TiersUnconfigured)));
}
