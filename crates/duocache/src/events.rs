// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cross-process invalidation events.
//!
//! When local-cache sync is enabled, every successful write emits a typed
//! event describing which keys changed. A single consumer task drains a
//! bounded channel and hands events to the configured handler; a typical
//! handler publishes them over a pub/sub transport so peer processes can
//! drop the affected keys from their L1.
//!
//! The producer never blocks: when the channel is full the event is dropped
//! and a warning is logged.
//!
//! Consumers should suppress events whose `source_id` matches their own
//! cache's [`source_id`](crate::Cache::source_id), otherwise every write
//! would invalidate the writer's own L1.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// What kind of write produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A direct `set`.
    Set,
    /// A `once` miss filled the key.
    SetByOnce,
    /// The refresh engine rewrote the key.
    SetByRefresh,
    /// A multi-get wrote the keys back.
    SetByMGet,
    /// The keys were deleted.
    Delete,
}

/// A write notification for peer processes.
#[derive(Debug, Clone)]
pub struct Event {
    /// Name of the emitting cache.
    pub cache_name: String,
    /// Identity of the emitting cache instance, for self-suppression.
    pub source_id: String,
    /// What kind of write happened.
    pub event_type: EventType,
    /// The affected keys.
    pub keys: Vec<String>,
}

/// Consumer callback for events.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

pub(crate) struct EventBus {
    tx: mpsc::Sender<Event>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Starts the consumer task and returns the producer handle.
    pub(crate) fn start(capacity: usize, handler: EventHandler, mut shutdown: watch::Receiver<bool>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Event>(capacity);

        crate::util::spawn_recovered("event-consumer", async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        // A panicking handler must not kill the consumer.
                        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                            tracing::error!(panic = crate::util::panic_message(&panic), "event handler panicked");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        Self { tx }
    }

    /// Enqueues an event without blocking. Overflow drops the event.
    pub(crate) fn send(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    cache = event.cache_name,
                    event_type = ?event.event_type,
                    keys = event.keys.len(),
                    "event channel full, dropping event",
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(
                    cache = event.cache_name,
                    event_type = ?event.event_type,
                    "event channel closed, dropping event",
                );
            }
        }
    }
}
