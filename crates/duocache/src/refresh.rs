// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The asynchronous refresh engine.
//!
//! Keys enrolled through [`Item::refresh`](crate::Item::refresh) are kept
//! warm: a ticker re-runs their loader every `refresh_duration` with at most
//! `refresh_concurrency` workers in flight, and cooperating processes sharing the remote
//! tier elect one refresher per key and tick via an advisory lock stored
//! under `key + "_#RL#"`.
//!
//! A task that has not been read through `once` for longer than
//! `stop_refresh_after_last_access` is cancelled on the next tick, so the
//! engine only works for keys something still wants.
//!
//! Refresh-path failures are logged and swallowed; a failed refresh leaves
//! the previous value in place and must never take down the tick loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::{Inner, WriteFlags};
use crate::codec::Codec;
use crate::error::Error;
use crate::events::EventType;
use crate::item::{ByteLoader, Item};
use crate::stats::StatsHandler;
use crate::util;

/// Suffix of the advisory lock key guarding one key's refresh.
pub(crate) const LOCK_KEY_SUFFIX: &str = "_#RL#";

/// The lock must always expire before the next tick, so a crashed refresher
/// cannot permanently starve the key.
const LOCK_EXPIRY_MARGIN: Duration = Duration::from_millis(10);

/// A key enrolled for periodic refresh. Immutable except for the access
/// stamp, which `once` bumps atomically on every read.
pub(crate) struct RefreshTask {
    pub(crate) key: String,
    pub(crate) ttl: Option<Duration>,
    pub(crate) local_only: bool,
    pub(crate) loader: ByteLoader,
    pub(crate) set_xx: bool,
    pub(crate) set_nx: bool,
    pub(crate) skip_local: bool,
    /// Milliseconds since the refresher's epoch.
    last_access: AtomicU64,
}

impl RefreshTask {
    fn touch(&self, epoch: Instant) {
        self.last_access.store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn last_access_at(&self, epoch: Instant) -> Instant {
        epoch + Duration::from_millis(self.last_access.load(Ordering::Relaxed))
    }
}

pub(crate) struct Refresher {
    tasks: Mutex<HashMap<String, Arc<RefreshTask>>>,
    refresh_duration: Duration,
    stop_after: Duration,
    concurrency: usize,
    epoch: Instant,
}

impl Refresher {
    /// A zero `refresh_duration` disables the engine.
    pub(crate) fn new(refresh_duration: Duration, stop_after: Duration, concurrency: usize) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            refresh_duration,
            stop_after,
            concurrency,
            epoch: Instant::now(),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        !self.refresh_duration.is_zero()
    }

    pub(crate) fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.tasks.lock().clear();
    }

    pub(crate) fn lock_ttl(&self) -> Duration {
        self.refresh_duration.saturating_sub(LOCK_EXPIRY_MARGIN)
    }

    /// Installs a task for the item's key, or bumps the existing task's
    /// access stamp. Enrolment without a loader is meaningless and ignored.
    pub(crate) fn enroll<T>(&self, item: &Item<T>, codec: Codec)
    where
        T: Serialize + Send + 'static,
    {
        if !self.enabled() {
            return;
        }
        let Some(loader) = &item.loader else {
            tracing::debug!(key = %item.key, "refresh requested without a loader, skipping enrolment");
            return;
        };

        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get(&item.key) {
            task.touch(self.epoch);
            return;
        }
        let task = Arc::new(RefreshTask {
            key: item.key.clone(),
            ttl: item.ttl,
            local_only: item.local_only,
            loader: loader.bind(codec),
            set_xx: item.set_xx,
            set_nx: item.set_nx,
            skip_local: item.skip_local,
            last_access: AtomicU64::new(0),
        });
        task.touch(self.epoch);
        tasks.insert(item.key.clone(), task);
    }
}

/// Starts the tick loop for a freshly built cache.
///
/// The loop holds only a weak reference: dropping the last cache handle (or
/// calling `close`) ends it.
pub(crate) fn spawn_tick(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    let mut shutdown = inner.shutdown.subscribe();
    let period = inner.refresher.refresh_duration;
    let concurrency = inner.refresher.concurrency;

    util::spawn_recovered("refresh-tick", async move {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the first
        // refresh runs one full period after construction.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    run_tick(&inner, &semaphore).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

async fn run_tick(inner: &Arc<Inner>, semaphore: &Arc<Semaphore>) {
    // Snapshot taken before the walk so queueing cannot age tasks past
    // their idle deadline mid-tick.
    let now = Instant::now();
    let refresher = &inner.refresher;

    let due = {
        let mut tasks = refresher.tasks.lock();
        let mut due = Vec::with_capacity(tasks.len());
        tasks.retain(|key, task| {
            if now.duration_since(task.last_access_at(refresher.epoch)) > refresher.stop_after {
                tracing::debug!(cache = %inner.name, key = %key, "cancel refresh");
                false
            } else {
                due.push(Arc::clone(task));
                true
            }
        });
        due
    };

    for task in due {
        let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
            break;
        };
        let inner = Arc::clone(inner);
        util::spawn_recovered("refresh-worker", async move {
            let _permit = permit;
            tracing::debug!(cache = %inner.name, key = %task.key, "start refresh");
            if inner.remote.is_some() {
                inner.external_load(&task).await;
            } else {
                inner.local_load(&task).await;
            }
        });
    }
}

impl Inner {
    /// Refresh with cross-process coordination: at most one of the
    /// processes sharing the remote tier re-runs the loader per tick; the
    /// others copy the winner's value from L2 into their L1.
    pub(crate) async fn external_load(self: &Arc<Self>, task: &Arc<RefreshTask>) {
        let Some(remote) = &self.remote else { return };
        let lock_key = format!("{}{}", task.key, LOCK_KEY_SUFFIX);

        let should_load = match remote.get(&lock_key).await {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                tracing::error!(cache = %self.name, key = %task.key, error = %e, "refresh lock read failed");
                return;
            }
        };

        if !should_load {
            if self.local.is_some() {
                self.refresh_local(task).await;
            }
            return;
        }

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        match remote.set_nx(&lock_key, Bytes::from(stamp), self.refresher.lock_ttl()).await {
            Ok(true) => {
                if let Err(e) = self.set_from_task(task).await {
                    tracing::error!(cache = %self.name, key = %task.key, error = %e, "refresh load failed");
                }
            }
            Ok(false) => {
                // Another process won the lock. Wait a fraction of the tick
                // for the winner to write L2, then copy its value locally.
                if self.local.is_some() {
                    let inner = Arc::clone(self);
                    let task = Arc::clone(task);
                    let delay = self.refresher.refresh_duration / 5;
                    util::spawn_recovered("refresh-catchup", async move {
                        tokio::time::sleep(delay).await;
                        inner.refresh_local(&task).await;
                    });
                }
            }
            Err(e) => {
                tracing::error!(cache = %self.name, key = %task.key, error = %e, "refresh lock acquire failed");
            }
        }
    }

    /// Refresh without a remote tier: re-run the loader and write L1.
    pub(crate) async fn local_load(&self, task: &RefreshTask) {
        if let Err(e) = self.set_from_task(task).await {
            tracing::error!(cache = %self.name, key = %task.key, error = %e, "refresh load failed");
        }
    }

    /// Copies the remote tier's current value for the task's key into L1.
    pub(crate) async fn refresh_local(&self, task: &RefreshTask) {
        let Some(remote) = &self.remote else { return };
        let Some(local) = &self.local else { return };
        match remote.get(&task.key).await {
            Ok(Some(bytes)) => local.set(&task.key, bytes),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(cache = %self.name, key = %task.key, error = %e, "refresh local read failed");
            }
        }
    }

    async fn set_from_task(&self, task: &RefreshTask) -> Result<(), Error> {
        self.stats.query();
        let bytes = match task.loader.load().await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.query_fail(&e);
                return Err(e);
            }
        };
        let flags = WriteFlags {
            set_xx: task.set_xx,
            set_nx: task.set_nx,
            skip_local: task.skip_local,
        };
        let ttl = self.effective_remote_ttl(task.ttl, task.local_only, &task.key);
        self.apply_write(&task.key, bytes, flags, ttl).await?;
        self.emit(EventType::SetByRefresh, vec![task.key.clone()]);
        Ok(())
    }
}
