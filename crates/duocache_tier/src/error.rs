// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error type for remote tier operations.

use std::error::Error as StdError;
use std::sync::Arc;

/// A transport or server failure reported by a [`RemoteTier`](crate::RemoteTier).
///
/// Key absence is not an error; the contract expresses it as `Ok(None)`.
/// The source is `Arc`-wrapped so the error can be cloned and shared with
/// every waiter of a coalesced load.
///
/// # For implementers
///
/// Wrap backend-specific errors with [`from_source`](Self::from_source):
///
/// ```
/// use duocache_tier::RemoteError;
///
/// let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
/// let err = RemoteError::from_source(io_err);
/// assert!(err.source_as::<std::io::Error>().is_some());
/// ```
#[derive(Clone, Debug, thiserror::Error)]
#[error("remote tier: {cause}")]
pub struct RemoteError {
    cause: Arc<dyn StdError + Send + Sync>,
}

impl RemoteError {
    /// Creates an error wrapping a backend-specific source error.
    pub fn from_source(cause: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            cause: Arc::new(cause),
        }
    }

    /// Creates an error from a message string.
    ///
    /// Prefer [`from_source`](Self::from_source) when wrapping an existing
    /// error so the original type stays extractable.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            cause: Arc::new(Message(message.into())),
        }
    }

    /// Returns the source error as type `T` if it matches.
    #[must_use]
    pub fn source_as<T: StdError + 'static>(&self) -> Option<&T> {
        self.cause.downcast_ref::<T>()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);
