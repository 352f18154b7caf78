//! # Checkpoint Coordination
//!
//! Buffers checkpoint acknowledgement markers and releases them to the
//! downstream [`CheckpointSink`] once the record ranges they reference are
//! durably persisted:
//!
//! - [`CheckpointCoordinator`] — mode-exclusive FIFO queues plus the flush
//!   walk that forwards ready payloads in strict arrival order
//! - [`CheckpointSink`] — the outbound delivery boundary
//! - [`CheckpointMode`] — stream-scoped vs global, fixed per sync
//!
//! Payloads are opaque blobs; this module never inspects or re-encodes
//! them. Emission order is FIFO per stream (stream mode) or globally
//! (global mode): a later marker is never emitted before an earlier one in
//! the same scope, even if its data becomes ready first.

pub mod coordinator;
pub mod error;
pub mod sink;

pub use coordinator::CheckpointCoordinator;
pub use error::{CheckpointError, CheckpointMode, SinkError};
pub use sink::CheckpointSink;
