//! Outbound boundary for ready checkpoint payloads.

use async_trait::async_trait;

use super::error::SinkError;

/// Destination for checkpoint payloads whose data is durable.
///
/// Called by the coordinator for each ready marker, in emission order.
/// Delivery is at-least-once from the core's perspective: the coordinator
/// dequeues a marker only after `emit` returns `Ok`, so a failure (or a
/// crash between emit and dequeue) leads to re-delivery on a later flush.
///
/// Implementations must not call back into the coordinator from `emit`;
/// the coordinator holds its queue lock across the call.
#[async_trait]
pub trait CheckpointSink<T>: Send + Sync {
    /// Forwards one ready payload downstream.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the payload could not be delivered; the
    /// coordinator keeps the marker queued and surfaces the error.
    async fn emit(&self, payload: &T) -> Result<(), SinkError>;
}
