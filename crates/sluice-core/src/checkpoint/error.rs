//! Error types for checkpoint coordination.

use std::fmt;

use thiserror::Error;

use crate::catalog::StreamKey;
use crate::stream::StreamError;

/// Which checkpointing mode a sync is operating in.
///
/// The mode is fixed by the first marker received and is immutable for the
/// rest of the sync; the opposite kind is rejected thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Markers are scoped to a single stream each.
    Stream,
    /// Markers span every stream in the sync.
    Global,
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Error returned by a [`CheckpointSink`](super::CheckpointSink) when
/// delivery of a ready payload fails.
///
/// The coordinator leaves the undelivered marker at the head of its queue;
/// the next flush re-attempts delivery.
#[derive(Debug, Error)]
#[error("checkpoint sink rejected payload: {message}")]
pub struct SinkError {
    /// Sink-specific description of the failure.
    pub message: String,
}

impl SinkError {
    /// Creates a sink error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised by the checkpoint coordinator.
///
/// Ordering and mode violations indicate a bug in the upstream message
/// producer: fatal, never retried.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A marker of the opposite scope arrived after the mode was fixed.
    #[error(
        "checkpoint mode conflict: sync is using {active} checkpoints, \
         received a {received} checkpoint"
    )]
    ModeConflict {
        /// Mode fixed by the first marker of the sync.
        active: CheckpointMode,
        /// Mode of the rejected marker.
        received: CheckpointMode,
    },

    /// A marker arrived with an index lower than one already queued.
    #[error(
        "out-of-order checkpoint for {stream}: queued index {queued}, \
         received index {received}"
    )]
    OutOfOrder {
        /// Stream whose index regressed.
        stream: StreamKey,
        /// Index already queued for the stream.
        queued: u64,
        /// The regressing index that was received.
        received: u64,
    },

    /// Delivery of a ready payload to the sink failed.
    #[error(transparent)]
    Delivery(#[from] SinkError),

    /// A marker referenced a stream the registry does not know.
    #[error(transparent)]
    Stream(#[from] StreamError),
}
