// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the multi-get engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use duocache::{Cache, Error, LoadError, LocalTier, NOT_FOUND_PLACEHOLDER};
use duocache_tier::testing::{MockLocal, MockRemote, RemoteOp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    label: String,
    id: u64,
}

fn row(id: u64) -> Row {
    Row {
        label: "s".to_owned(),
        id,
    }
}

fn both_tier_cache() -> (Cache, MockLocal, MockRemote) {
    let local = MockLocal::new();
    let remote = MockRemote::new();
    let cache = Cache::builder()
        .name("mget-test")
        .local(local.clone())
        .remote(remote.clone())
        .not_found_expiry(Duration::from_secs(60))
        .build()
        .unwrap();
    (cache, local, remote)
}

/// A bulk loader that returns rows for a fixed id set and counts its calls.
fn partial_loader(
    served: &'static [u64],
    calls: Arc<AtomicUsize>,
) -> impl Fn(Vec<u64>) -> futures::future::BoxFuture<'static, Result<HashMap<u64, Row>, LoadError>> + Send + Sync {
    move |ids: Vec<u64>| {
        calls.fetch_add(1, Ordering::SeqCst);
        let fut: futures::future::BoxFuture<'static, Result<HashMap<u64, Row>, LoadError>> = Box::pin(async move {
            Ok(ids
                .into_iter()
                .filter(|id| served.contains(id))
                .map(|id| (id, row(id)))
                .collect())
        });
        fut
    }
}

#[tokio::test]
async fn partial_fill_negative_caches_the_absent_ids() {
    let (cache, local, remote) = both_tier_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = cache
        .mget("s", &[1u64, 2, 3], Some(partial_loader(&[1, 2], Arc::clone(&calls))))
        .await;

    assert_eq!(result.len(), 2);
    assert_eq!(result.get(&1), Some(&row(1)));
    assert_eq!(result.get(&2), Some(&row(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The absent id got a placeholder in both tiers.
    assert_eq!(local.get("s:3"), Some(Bytes::from_static(NOT_FOUND_PLACEHOLDER)));
    assert_eq!(remote.value_of("s:3"), Some(Bytes::from_static(NOT_FOUND_PLACEHOLDER)));
    assert!(remote.value_of("s:1").is_some());

    // Second call: everything answered from cache; a loader returning
    // nothing yields an empty map for the negative-cached id.
    let second = cache
        .mget("s", &[3u64], Some(|_ids: Vec<u64>| async { Ok(HashMap::<u64, Row>::new()) }))
        .await;
    assert!(second.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "the first loader is not consulted again");
}

#[tokio::test]
async fn values_and_placeholders_use_separate_expiring_bulk_writes() {
    let (cache, _, remote) = both_tier_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let _ = cache
        .mget("s", &[1u64, 2, 3], Some(partial_loader(&[1, 2], calls)))
        .await;

    let msets: Vec<_> = remote
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            RemoteOp::MSet { keys, ttl } => Some((keys, ttl)),
            _ => None,
        })
        .collect();
    assert_eq!(msets.len(), 2, "one bulk write per TTL class");

    let (value_keys, value_ttl) = &msets[0];
    assert_eq!(value_keys, &vec!["s:1".to_owned(), "s:2".to_owned()]);
    assert_eq!(*value_ttl, Duration::from_secs(3600));

    let (placeholder_keys, placeholder_ttl) = &msets[1];
    assert_eq!(placeholder_keys, &vec!["s:3".to_owned()]);
    assert!(*placeholder_ttl >= Duration::from_secs(60));
    assert!(*placeholder_ttl < Duration::from_secs(66));
}

#[tokio::test]
async fn duplicate_ids_collapse_to_one_composite() {
    let (cache, _, _) = both_tier_cache();
    let seen: Arc<parking_lot::Mutex<Vec<u64>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let seen_in_loader = Arc::clone(&seen);
    let result = cache
        .mget(
            "s",
            &[7u64, 7, 7],
            Some(move |ids: Vec<u64>| {
                seen_in_loader.lock().extend(ids.iter().copied());
                async move { Ok(ids.into_iter().map(|id| (id, row(id))).collect::<HashMap<u64, Row>>()) }
            }),
        )
        .await;

    assert_eq!(result.len(), 1);
    assert_eq!(*seen.lock(), vec![7]);
}

#[tokio::test]
async fn second_call_is_served_from_the_local_tier() {
    let (cache, _, remote) = both_tier_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let _ = cache.mget("s", &[1u64, 2], Some(partial_loader(&[1, 2], Arc::clone(&calls)))).await;
    let ops_before = remote.operations().len();

    let result = cache.mget("s", &[1u64, 2], Some(partial_loader(&[1, 2], Arc::clone(&calls)))).await;
    assert_eq!(result.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.operations().len(), ops_before, "no remote traffic on a warm read");

    let stats = cache.stats();
    assert_eq!(stats.local_hit, 2);
}

#[tokio::test]
async fn remote_hits_warm_the_local_tier() {
    let (cache, local, _) = both_tier_cache();

    // Another process wrote these composites to the shared tier.
    cache.set_by_id("s", 1u64, row(1)).await.unwrap();
    cache.set_by_id("s", 2u64, row(2)).await.unwrap();
    local.del("s:1");
    local.del("s:2");

    let result: HashMap<u64, Row> = cache
        .mget("s", &[1u64, 2], None::<fn(Vec<u64>) -> futures::future::Ready<Result<HashMap<u64, Row>, LoadError>>>)
        .await;

    assert_eq!(result.len(), 2);
    assert!(local.get("s:1").is_some());
    assert!(local.get("s:2").is_some());
}

#[tokio::test]
async fn without_remote_and_loader_the_result_is_what_l1_held() {
    let local = MockLocal::new();
    let cache = Cache::builder().local(local.clone()).build().unwrap();

    cache.set_by_id("s", 1u64, row(1)).await.unwrap();

    let result: HashMap<u64, Row> = cache
        .mget("s", &[1u64, 2], None::<fn(Vec<u64>) -> futures::future::Ready<Result<HashMap<u64, Row>, LoadError>>>)
        .await;
    assert_eq!(result.len(), 1);
    assert_eq!(result.get(&1), Some(&row(1)));
}

#[tokio::test]
async fn loader_failure_surfaces_through_the_error_variant() {
    let (cache, _, _) = both_tier_cache();

    let (result, errors) = cache
        .mget_with_errors(
            "s",
            &[1u64],
            Some(|_ids: Vec<u64>| async { Err::<HashMap<u64, Row>, _>(LoadError::from("backend down")) }),
        )
        .await;

    assert!(result.is_empty());
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::Loader(_)));
    assert_eq!(cache.stats().query_fail, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_fan_out() {
    let (cache, _, _) = both_tier_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .mget(
                    "s",
                    &[1u64, 2],
                    Some(move |ids: Vec<u64>| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(ids.into_iter().map(|id| (id, row(id))).collect::<HashMap<u64, Row>>())
                        }
                    }),
                )
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.len(), 2);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_by_id_reads_through_the_composite_key() {
    let (cache, local, _) = both_tier_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&calls);
    let loader = move |id: u64| {
        let counted = Arc::clone(&counted);
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok::<_, LoadError>(Some(row(id)))
        }
    };

    let got: Row = cache.get_by_id("s", 9u64, loader.clone()).await.unwrap();
    assert_eq!(got, row(9));
    assert!(local.get("s:9").is_some());

    let again: Row = cache.get_by_id("s", 9u64, loader).await.unwrap();
    assert_eq!(again, row(9));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_separator_shapes_composite_keys() {
    let local = MockLocal::new();
    let cache = Cache::builder().local(local.clone()).separator("/").build().unwrap();

    cache.set_by_id("s", 5u64, row(5)).await.unwrap();
    assert!(local.get("s/5").is_some());

    let disabled = MockLocal::new();
    let cache = Cache::builder().local(disabled.clone()).separator_disabled().build().unwrap();
    cache.set_by_id("s", 5u64, row(5)).await.unwrap();
    assert!(disabled.get("s5").is_some());
}
