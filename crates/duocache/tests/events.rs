// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the invalidation event bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duocache::{Cache, Event, EventType, Item, LoadError, LocalTier};
use duocache_tier::testing::{MockLocal, MockRemote};

fn event_cache() -> (Cache, Arc<Mutex<Vec<Event>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cache = Cache::builder()
        .name("events-test")
        .local(MockLocal::new())
        .remote(MockRemote::new())
        .sync_local()
        .source_id("instance-a")
        .event_handler(move |event| sink.lock().unwrap().push(event))
        .build()
        .unwrap();
    (cache, seen)
}

async fn drain() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn writes_emit_typed_events_with_the_source_identity() {
    let (cache, seen) = event_cache();

    cache.set(Item::new("a").value("1".to_owned())).await.unwrap();
    let _: String = cache
        .once(Item::new("b").loader(|| async { Ok::<_, std::io::Error>(Some("2".to_owned())) }))
        .await
        .unwrap();
    cache.delete("a").await.unwrap();
    drain().await;

    let seen = seen.lock().unwrap();
    let kinds: Vec<EventType> = seen.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![EventType::Set, EventType::SetByOnce, EventType::Delete]);
    for event in seen.iter() {
        assert_eq!(event.cache_name, "events-test");
        assert_eq!(event.source_id, "instance-a");
    }
    assert_eq!(seen[0].keys, vec!["a".to_owned()]);
    assert_eq!(seen[1].keys, vec!["b".to_owned()]);
}

#[tokio::test]
async fn once_served_from_cache_emits_nothing() {
    let (cache, seen) = event_cache();

    cache.set(Item::new("a").value("1".to_owned())).await.unwrap();
    drain().await;
    let before = seen.lock().unwrap().len();

    let _: String = cache
        .once(Item::new("a").loader(|| async { Ok::<_, std::io::Error>(Some("other".to_owned())) }))
        .await
        .unwrap();
    drain().await;
    assert_eq!(seen.lock().unwrap().len(), before);
}

#[tokio::test]
async fn mget_write_back_emits_the_touched_composites() {
    let (cache, seen) = event_cache();

    let _ = cache
        .mget(
            "s",
            &[1u64, 2],
            Some(|ids: Vec<u64>| async move {
                Ok(ids.into_iter().map(|id| (id, format!("v{id}"))).collect::<HashMap<u64, String>>())
            }),
        )
        .await;
    drain().await;

    let seen = seen.lock().unwrap();
    let mget_event = seen
        .iter()
        .find(|e| e.event_type == EventType::SetByMGet)
        .expect("a bulk write-back event");
    let mut keys = mget_event.keys.clone();
    keys.sort();
    assert_eq!(keys, vec!["s:1".to_owned(), "s:2".to_owned()]);
}

#[tokio::test]
async fn events_are_not_emitted_without_sync_local() {
    let seen = Arc::new(Mutex::new(Vec::<Event>::new()));
    let sink = Arc::clone(&seen);
    let cache = Cache::builder()
        .local(MockLocal::new())
        .remote(MockRemote::new())
        // No sync_local: the handler must never fire.
        .event_handler(move |event| sink.lock().unwrap().push(event))
        .build()
        .unwrap();

    cache.set(Item::new("a").value("1".to_owned())).await.unwrap();
    drain().await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn a_peer_invalidation_maps_to_delete_from_local() {
    // Two instances share a remote tier; an event from A applied to B's
    // local tier removes B's stale copy while the shared tier keeps the
    // fresh one.
    let remote = MockRemote::new();
    let local_b = MockLocal::new();

    let cache_b = Cache::builder()
        .name("peer")
        .local(local_b.clone())
        .remote(remote.clone())
        .build()
        .unwrap();

    let events = Arc::new(Mutex::new(Vec::<Event>::new()));
    let sink = Arc::clone(&events);
    let cache_a = Cache::builder()
        .name("peer")
        .local(MockLocal::new())
        .remote(remote)
        .sync_local()
        .source_id("a")
        .event_handler(move |event| sink.lock().unwrap().push(event))
        .build()
        .unwrap();

    // B has an old copy in its L1.
    cache_b.set(Item::new("k").value("old".to_owned())).await.unwrap();

    // A rewrites the key and its handler fans the event out to peers.
    cache_a.set(Item::new("k").value("new".to_owned())).await.unwrap();
    drain().await;

    for event in events.lock().unwrap().iter() {
        // The consumer suppresses its own instance before fanning out.
        if event.source_id == cache_b.source_id() {
            continue;
        }
        for key in &event.keys {
            cache_b.delete_from_local(key);
        }
    }

    assert!(local_b.get("k").is_none());
    let fresh: String = cache_b.get("k").await.unwrap();
    assert_eq!(fresh, "new");
}

#[tokio::test(start_paused = true)]
async fn refresh_rewrites_emit_their_own_event_type() {
    let seen = Arc::new(Mutex::new(Vec::<Event>::new()));
    let sink = Arc::clone(&seen);
    let cache = Cache::builder()
        .name("refresh-events")
        .local(MockLocal::new())
        .remote(MockRemote::new())
        .sync_local()
        .event_handler(move |event| sink.lock().unwrap().push(event))
        .refresh_duration(Duration::from_secs(1))
        .stop_refresh_after_last_access(Duration::from_secs(10))
        .build()
        .unwrap();

    let _: String = cache
        .once(
            Item::new("k")
                .refresh()
                .loader(|| async { Ok::<_, LoadError>(Some("v".to_owned())) }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    drain().await;
    let kinds: Vec<EventType> = seen.lock().unwrap().iter().map(|e| e.event_type).collect();
    assert!(kinds.contains(&EventType::SetByOnce));
    assert!(kinds.contains(&EventType::SetByRefresh));
}
