// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bulk lookup for `{prefix, id}` key families.
//!
//! [`Cache::mget`] fans a list of ids across L1 and L2 and makes a single
//! bulk-loader call for whatever is left, negative-caching ids the loader
//! did not return. Concurrent callers asking for the same id set share one
//! fan-out through a single-flight keyed by the sorted miss set.
//!
//! Inside the engine everything is bytes; values decode at the very end
//! into each caller's result map.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};

use crate::cache::{Cache, Inner, NOT_FOUND_PLACEHOLDER};
use crate::error::{Error, LoadError};
use crate::events::EventType;
use crate::item::Item;
use crate::keys;
use crate::stats::StatsHandler;

impl Cache {
    /// Retrieves the values for `ids` under `prefix`.
    ///
    /// Ids with no value (loader did not return them, or a negative answer
    /// is cached) carry no entry in the result. Failures along the way are
    /// logged and the partial result is returned; use
    /// [`mget_with_errors`](Self::mget_with_errors) to observe them.
    ///
    /// Pass `None` for the loader to read only what the tiers already hold.
    pub async fn mget<I, T, F, Fut>(&self, prefix: &str, ids: &[I], loader: Option<F>) -> HashMap<I, T>
    where
        I: Display + Ord + Hash + Clone + Send + Sync,
        T: Serialize + DeserializeOwned,
        F: Fn(Vec<I>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<HashMap<I, T>, LoadError>> + Send,
    {
        let (result, errors) = self.mget_with_errors(prefix, ids, loader).await;
        for error in &errors {
            tracing::warn!(cache = %self.inner.name, prefix = %prefix, error = %error, "mget error");
        }
        result
    }

    /// Like [`mget`](Self::mget), returning the partial result together
    /// with every error encountered along the way.
    pub async fn mget_with_errors<I, T, F, Fut>(
        &self,
        prefix: &str,
        ids: &[I],
        loader: Option<F>,
    ) -> (HashMap<I, T>, Vec<Error>)
    where
        I: Display + Ord + Hash + Clone + Send + Sync,
        T: Serialize + DeserializeOwned,
        F: Fn(Vec<I>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<HashMap<I, T>, LoadError>> + Send,
    {
        let inner = &self.inner;
        let mut result = HashMap::new();
        let mut errors = Vec::new();
        if ids.is_empty() {
            return (result, errors);
        }

        // Duplicates collapse here: one composite per distinct id.
        let mut miss: HashMap<String, I> = ids
            .iter()
            .map(|id| (keys::composite(prefix, &inner.separator, id), id.clone()))
            .collect();

        if inner.local.is_some() {
            inner.mget_local_typed(&mut miss, &mut result, &mut errors);
            if miss.is_empty() {
                return (result, errors);
            }
        }

        if inner.remote.is_none() && loader.is_none() {
            return (result, errors);
        }

        let mut miss_ids: Vec<I> = miss.values().cloned().collect();
        miss_ids.sort();
        let flight_key = keys::family(prefix, &inner.separator, &miss_ids);

        // Errors the leader hits inside the flight stay with the leader;
        // followers only share the resolved byte map.
        let leader_errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());
        let leader_errors_ref = &leader_errors;
        let (resolved, led) = inner
            .mget_group
            .execute(&flight_key, || {
                let mut flight_miss = miss.clone();
                let leader_errors = leader_errors_ref;
                async move {
                    let mut resolved: HashMap<String, Option<Bytes>> = HashMap::new();

                    if inner.local.is_some() {
                        // Racers may have filled L1 while we queued.
                        inner.mget_local_bytes(&mut flight_miss, &mut resolved);
                        if flight_miss.is_empty() {
                            return resolved;
                        }
                    }

                    if inner.remote.is_some() {
                        inner.mget_remote_bytes(&mut flight_miss, &mut resolved, leader_errors).await;
                        if flight_miss.is_empty() {
                            return resolved;
                        }
                    }

                    if let Some(loader) = &loader {
                        inner
                            .mget_load_and_write(&flight_miss, loader, &mut resolved, leader_errors)
                            .await;
                    }

                    resolved
                }
            })
            .await;
        if led {
            errors.extend(leader_errors.into_inner());
        }

        for (composite, id) in miss {
            match resolved.get(&composite) {
                Some(Some(bytes)) => match inner.codec.decode::<T>(bytes) {
                    Ok(value) => {
                        result.insert(id, value);
                    }
                    Err(e) => errors.push(e),
                },
                // Known absent, or the flight never reached this id.
                Some(None) | None => {}
            }
        }

        (result, errors)
    }

    /// Reads one member of a composite family through [`once`](Cache::once).
    ///
    /// The loader receives the id and returns `Ok(None)` for "no entity",
    /// which is negative-cached like any other `once` miss.
    ///
    /// # Errors
    ///
    /// See [`once`](Cache::once).
    pub async fn get_by_id<I, T, F, Fut>(&self, prefix: &str, id: I, loader: F) -> Result<T, Error>
    where
        I: Display + Clone + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, LoadError>> + Send + 'static,
    {
        let key = keys::composite(prefix, &self.inner.separator, &id);
        self.once(Item::new(key).loader(move || loader(id.clone()))).await
    }

    /// Writes one member of a composite family under the default expiry.
    ///
    /// # Errors
    ///
    /// See [`set`](Cache::set).
    pub async fn set_by_id<I, T>(&self, prefix: &str, id: I, value: T) -> Result<(), Error>
    where
        I: Display,
        T: Serialize,
    {
        let key = keys::composite(prefix, &self.inner.separator, &id);
        self.set(Item::new(key).value(value)).await
    }
}

impl Inner {
    /// First L1 pass, outside the flight: fills the caller's typed result.
    /// Misses carry no stats here; they may yet be hits for the flight.
    fn mget_local_typed<I, T>(&self, miss: &mut HashMap<String, I>, result: &mut HashMap<I, T>, errors: &mut Vec<Error>)
    where
        I: Eq + Hash + Clone,
        T: DeserializeOwned,
    {
        let Some(local) = &self.local else { return };
        let composites: Vec<String> = miss.keys().cloned().collect();
        for composite in composites {
            let Some(bytes) = local.get(&composite) else { continue };
            let Some(id) = miss.remove(&composite) else { continue };
            self.stats.hit();
            self.stats.local_hit();
            if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
                continue;
            }
            match self.codec.decode::<T>(&bytes) {
                Ok(value) => {
                    result.insert(id, value);
                }
                Err(e) => errors.push(e),
            }
        }
    }

    /// Second L1 pass, inside the flight: byte-level, with miss stats.
    fn mget_local_bytes<I>(&self, miss: &mut HashMap<String, I>, resolved: &mut HashMap<String, Option<Bytes>>) {
        let Some(local) = &self.local else { return };
        let composites: Vec<String> = miss.keys().cloned().collect();
        for composite in composites {
            match local.get(&composite) {
                Some(bytes) => {
                    miss.remove(&composite);
                    self.stats.hit();
                    self.stats.local_hit();
                    if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
                        resolved.insert(composite, None);
                    } else {
                        resolved.insert(composite, Some(bytes));
                    }
                }
                None => {
                    self.stats.local_miss();
                    if self.remote.is_none() {
                        self.stats.miss();
                    }
                }
            }
        }
    }

    async fn mget_remote_bytes<I>(
        &self,
        miss: &mut HashMap<String, I>,
        resolved: &mut HashMap<String, Option<Bytes>>,
        errors: &Mutex<Vec<Error>>,
    ) {
        let Some(remote) = &self.remote else { return };
        let composites: Vec<String> = miss.keys().cloned().collect();
        let values = match remote.mget(&composites).await {
            Ok(values) => values,
            Err(e) => {
                errors.lock().push(e.into());
                return;
            }
        };

        for composite in composites {
            let Some(bytes) = values.get(&composite) else {
                self.stats.miss();
                self.stats.remote_miss();
                continue;
            };
            miss.remove(&composite);
            self.stats.hit();
            self.stats.remote_hit();
            if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
                resolved.insert(composite, None);
                continue;
            }
            if let Some(local) = &self.local {
                local.set(&composite, bytes.clone());
            }
            resolved.insert(composite, Some(bytes.clone()));
        }
    }

    /// Bulk-loads the remaining ids and writes everything back: values
    /// under the default remote expiry, placeholders for absent ids under
    /// the (jittered) not-found expiry. L1 writes happen before L2 so the
    /// emitter's local view is current when peers hear the event.
    async fn mget_load_and_write<I, T, F, Fut>(
        &self,
        miss: &HashMap<String, I>,
        loader: &F,
        resolved: &mut HashMap<String, Option<Bytes>>,
        errors: &Mutex<Vec<Error>>,
    ) where
        I: Eq + Hash + Clone,
        T: Serialize,
        F: Fn(Vec<I>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<HashMap<I, T>, LoadError>> + Send,
    {
        let miss_ids: Vec<I> = miss.values().cloned().collect();
        self.stats.query();
        let loaded = match loader(miss_ids).await {
            Ok(map) => map,
            Err(e) => {
                let error = Error::loader(e);
                self.stats.query_fail(&error);
                errors.lock().push(error);
                return;
            }
        };

        let mut values: HashMap<String, Bytes> = HashMap::new();
        let mut placeholders: HashMap<String, Bytes> = HashMap::new();
        for (composite, id) in miss {
            match loaded.get(id) {
                Some(value) => match self.codec.encode(value) {
                    Ok(bytes) => {
                        resolved.insert(composite.clone(), Some(bytes.clone()));
                        values.insert(composite.clone(), bytes);
                    }
                    Err(e) => {
                        errors.lock().push(e);
                        resolved.insert(composite.clone(), None);
                        placeholders.insert(composite.clone(), Bytes::from_static(NOT_FOUND_PLACEHOLDER));
                    }
                },
                None => {
                    resolved.insert(composite.clone(), None);
                    placeholders.insert(composite.clone(), Bytes::from_static(NOT_FOUND_PLACEHOLDER));
                }
            }
        }

        if let Some(local) = &self.local {
            for (composite, bytes) in &values {
                local.set(composite, bytes.clone());
            }
            for (composite, bytes) in &placeholders {
                local.set(composite, bytes.clone());
            }
        }

        if let Some(remote) = &self.remote {
            if !values.is_empty()
                && let Err(e) = remote.mset(values, self.remote_expiry).await
            {
                errors.lock().push(e.into());
            }
            if !placeholders.is_empty() {
                let ttl = self.not_found_expiry + self.placeholder_jitter();
                if let Err(e) = remote.mset(placeholders, ttl).await {
                    errors.lock().push(e.into());
                }
            }
            self.emit(EventType::SetByMGet, miss.keys().cloned().collect());
        }
    }
}
