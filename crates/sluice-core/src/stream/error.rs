//! Error types for stream tracking and registry operations.

use thiserror::Error;

use crate::catalog::StreamKey;

/// Errors raised by stream trackers and the stream registry.
///
/// Every variant is a protocol violation by a producer or writer task:
/// fatal, never retried, expected to abort the sync with enough context to
/// identify the offending caller.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A record arrived after end-of-stream was already counted.
    #[error("record arrived on {stream} after end-of-stream (records read: {read_count})")]
    RecordAfterEndOfStream {
        /// Stream the record arrived on.
        stream: StreamKey,
        /// Record count at the time of the violation.
        read_count: u64,
    },

    /// End-of-stream was counted twice.
    #[error("end-of-stream counted twice on {stream} (records read: {read_count})")]
    EndOfStreamAlreadySet {
        /// Stream the duplicate end-of-stream arrived on.
        stream: StreamKey,
        /// Record count at the time of the violation.
        read_count: u64,
    },

    /// A stream was closed before its end-of-stream was counted.
    #[error("{stream} marked closed before end-of-stream was counted")]
    ClosedBeforeEndOfStream {
        /// Stream the premature close arrived on.
        stream: StreamKey,
    },

    /// A stream key is not present in the sync catalog.
    #[error("unknown stream {stream}: not in the sync catalog")]
    UnknownStream {
        /// The unrecognized stream key.
        stream: StreamKey,
    },

    /// A loader handle was registered twice for the same stream.
    #[error("loader handle already registered for {stream}")]
    LoaderAlreadyRegistered {
        /// Stream the duplicate registration arrived on.
        stream: StreamKey,
    },
}
