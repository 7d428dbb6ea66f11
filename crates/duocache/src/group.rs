// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key coalescing of concurrent loads.
//!
//! While one caller (the leader) is computing the value for a key, other
//! callers for the same key block on the same in-flight execution and
//! receive a clone of the leader's outcome. The entry is removed once the
//! leader completes, so later calls start a fresh execution.
//!
//! Coalescing is per-instance; it does not cross process boundaries. The
//! refresh engine's distributed lock covers the cross-process case.
//!
//! If a leader is cancelled before producing a value, its waiters are woken
//! and one of them takes over as the new leader with its own closure.

use std::collections::{HashMap, hash_map::Entry};
use std::sync::{Arc, OnceLock};

use event_listener::Event;
use parking_lot::Mutex;

/// A space in which identical units of work are executed with duplicate
/// suppression.
///
/// # Examples
///
/// ```
/// use duocache::FlightGroup;
///
/// # futures::executor::block_on(async {
/// let group: FlightGroup<u32> = FlightGroup::new();
///
/// let (value, led) = group.execute("answer", || async { 42 }).await;
/// assert_eq!(value, 42);
/// assert!(led);
/// # });
/// ```
pub struct FlightGroup<V> {
    calls: Mutex<HashMap<String, Arc<Shared<V>>>>,
}

struct Shared<V> {
    /// Written once by the leader, then read lock-free by followers.
    slot: OnceLock<V>,
    done: Event,
}

impl<V> Default for FlightGroup<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for FlightGroup<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGroup").field("in_flight", &self.calls.lock().len()).finish()
    }
}

impl<V> FlightGroup<V> {
    /// Creates a new, empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> FlightGroup<V> {
    /// Executes `make` for `key`, unless an execution for `key` is already
    /// in flight, in which case the caller waits for that execution and
    /// receives a clone of its value.
    ///
    /// Returns the value and whether this caller led the execution. The
    /// leader flag lets callers distinguish "I computed this" from "I was
    /// handed someone else's result".
    pub async fn execute<F, Fut>(&self, key: &str, make: F) -> (V, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let mut make = Some(make);
        loop {
            let (shared, is_leader) = {
                let mut calls = self.calls.lock();
                match calls.entry(key.to_owned()) {
                    Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                    Entry::Vacant(entry) => {
                        let shared = Arc::new(Shared {
                            slot: OnceLock::new(),
                            done: Event::new(),
                        });
                        entry.insert(Arc::clone(&shared));
                        (shared, true)
                    }
                }
            };

            if is_leader {
                // The guard removes the map entry and wakes every follower
                // when dropped, whether the execution finished or was
                // cancelled mid-flight.
                let _guard = LeaderGuard {
                    group: self,
                    key,
                    shared: &shared,
                };
                let func = make.take().expect("a caller leads at most once");
                let value = func().await;
                let _ = shared.slot.set(value.clone());
                return (value, true);
            }

            if let Some(value) = shared.slot.get() {
                return (value.clone(), false);
            }
            let listener = shared.done.listen();
            // Re-check after registering so a completion between the two
            // reads is not missed.
            if let Some(value) = shared.slot.get() {
                return (value.clone(), false);
            }
            listener.await;
            if let Some(value) = shared.slot.get() {
                return (value.clone(), false);
            }
            // Woken without a value: the leader was cancelled. Loop to
            // rejoin, possibly taking over as the new leader.
        }
    }
}

struct LeaderGuard<'a, V> {
    group: &'a FlightGroup<V>,
    key: &'a str,
    shared: &'a Arc<Shared<V>>,
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        let mut calls = self.group.calls.lock();
        if let Some(current) = calls.get(self.key)
            && Arc::ptr_eq(current, self.shared)
        {
            calls.remove(self.key);
        }
        drop(calls);
        self.shared.done.notify(usize::MAX);
    }
}
