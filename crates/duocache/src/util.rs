// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Small internal helpers.

use std::any::Any;

use futures::FutureExt;

/// Spawns a background task that catches and logs panics instead of letting
/// them poison the surrounding engine. Every fire-and-forget worker goes
/// through here.
pub(crate) fn spawn_recovered(task: &'static str, fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(async move {
        if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            tracing::error!(task, panic = panic_message(&panic), "background task panicked");
        }
    });
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// A fresh 16-hex-character instance identity for event self-suppression.
pub(crate) fn random_source_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn source_ids_are_sixteen_hex_chars() {
        let id = random_source_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn source_ids_differ_between_instances() {
        assert_ne!(random_source_id(), random_source_id());
    }

    #[tokio::test]
    async fn spawn_recovered_swallows_panics() {
        let reached = Arc::new(AtomicBool::new(false));

        spawn_recovered("panicking", async { panic!("worker bug") });
        let flag = Arc::clone(&reached);
        spawn_recovered("fine", async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reached.load(Ordering::SeqCst));
    }
}
