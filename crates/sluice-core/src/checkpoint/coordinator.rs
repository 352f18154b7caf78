//! Checkpoint coordinator: buffers acknowledgement markers and releases
//! them once their referenced data is durable.
//!
//! Markers arrive either stream-scoped (one stream, one index) or global
//! (one index per stream). A sync uses exactly one of the two modes, fixed
//! by the first marker received. [`flush_ready`](CheckpointCoordinator::flush_ready)
//! walks the pending queues in arrival order and forwards each payload to
//! the [`CheckpointSink`] once the referenced record ranges are persisted,
//! stopping at the first marker that is not yet ready: a gap blocks
//! everything behind it within its scope, but stream-scoped queues never
//! block each other.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use fxhash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use crate::catalog::StreamKey;
use crate::stream::StreamRegistry;

use super::error::{CheckpointError, CheckpointMode};
use super::sink::CheckpointSink;

/// A pending stream-scoped marker: the payload becomes safe to forward once
/// records `[0, index)` of its stream are persisted.
struct StreamMarker<T> {
    index: u64,
    payload: T,
}

/// A pending global marker: ready only when every referenced stream is
/// persisted up to its paired index.
struct GlobalMarker<T> {
    positions: Vec<(StreamKey, u64)>,
    payload: T,
}

/// Mode flag and pending queues as one closed sum type, so an illegal
/// mode/queue combination cannot be represented.
enum CheckpointQueues<T> {
    /// No marker has arrived yet; a flush is a no-op.
    Unset,
    /// Stream-scoped mode: one FIFO per stream.
    Stream(FxHashMap<StreamKey, VecDeque<StreamMarker<T>>>),
    /// Global mode: a single FIFO.
    Global(VecDeque<GlobalMarker<T>>),
}

/// Buffers checkpoint markers and forwards each payload, in strict arrival
/// order, once the referenced record ranges reach the persisted watermark.
///
/// The payload type `T` is opaque to the coordinator and forwarded
/// unchanged. Queue state lives behind one coordinator-global async mutex:
/// ordering and mode invariants span all streams in global mode, and
/// holding the lock across sink delivery keeps removal-after-delivery
/// atomic with respect to concurrent flushes.
pub struct CheckpointCoordinator<T> {
    registry: Arc<StreamRegistry>,
    sink: Arc<dyn CheckpointSink<T>>,
    queues: AsyncMutex<CheckpointQueues<T>>,
    last_flush: parking_lot::Mutex<Instant>,
}

impl<T: Send + Sync> CheckpointCoordinator<T> {
    /// Creates a coordinator over the given registry, forwarding ready
    /// payloads to `sink`.
    #[must_use]
    pub fn new(registry: Arc<StreamRegistry>, sink: Arc<dyn CheckpointSink<T>>) -> Self {
        Self {
            registry,
            sink,
            queues: AsyncMutex::new(CheckpointQueues::Unset),
            last_flush: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Enqueues a stream-scoped checkpoint marker.
    ///
    /// The first stream-scoped marker of a sync fixes the mode to
    /// stream-scoped. Markers for one stream must arrive with
    /// non-decreasing indexes.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::ModeConflict`] if the sync already uses global
    ///   checkpoints.
    /// - [`CheckpointError::OutOfOrder`] if `index` is below the last
    ///   queued index for `stream`.
    /// - [`CheckpointError::Stream`] if `stream` is not in the catalog.
    pub async fn add_stream_checkpoint(
        &self,
        stream: &StreamKey,
        index: u64,
        payload: T,
    ) -> Result<(), CheckpointError> {
        self.registry.get(stream)?;
        let mut queues = self.queues.lock().await;
        match &mut *queues {
            CheckpointQueues::Global(_) => Err(CheckpointError::ModeConflict {
                active: CheckpointMode::Global,
                received: CheckpointMode::Stream,
            }),
            CheckpointQueues::Unset => {
                let mut map = FxHashMap::default();
                Self::push_stream_marker(&mut map, stream, index, payload)?;
                *queues = CheckpointQueues::Stream(map);
                Ok(())
            }
            CheckpointQueues::Stream(map) => {
                Self::push_stream_marker(map, stream, index, payload)
            }
        }
    }

    /// Enqueues a global checkpoint marker spanning the given stream
    /// positions.
    ///
    /// The first global marker of a sync fixes the mode to global. Every
    /// referenced stream's index must be at least the corresponding index
    /// in the current queue head, since indexes only ever increase.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::ModeConflict`] if the sync already uses
    ///   stream-scoped checkpoints.
    /// - [`CheckpointError::OutOfOrder`] if any referenced stream's index
    ///   regressed below the queue head's.
    /// - [`CheckpointError::Stream`] if any referenced stream is not in the
    ///   catalog.
    pub async fn add_global_checkpoint(
        &self,
        positions: Vec<(StreamKey, u64)>,
        payload: T,
    ) -> Result<(), CheckpointError> {
        for (stream, _) in &positions {
            self.registry.get(stream)?;
        }
        let mut queues = self.queues.lock().await;
        match &mut *queues {
            CheckpointQueues::Stream(_) => Err(CheckpointError::ModeConflict {
                active: CheckpointMode::Stream,
                received: CheckpointMode::Global,
            }),
            CheckpointQueues::Unset => {
                let mut queue = VecDeque::new();
                queue.push_back(GlobalMarker { positions, payload });
                *queues = CheckpointQueues::Global(queue);
                Ok(())
            }
            CheckpointQueues::Global(queue) => {
                if let Some(head) = queue.front() {
                    for (stream, index) in &positions {
                        let head_index = head
                            .positions
                            .iter()
                            .find(|(head_stream, _)| head_stream == stream)
                            .map(|&(_, head_index)| head_index);
                        if let Some(head_index) = head_index {
                            if *index < head_index {
                                return Err(CheckpointError::OutOfOrder {
                                    stream: stream.clone(),
                                    queued: head_index,
                                    received: *index,
                                });
                            }
                        }
                    }
                }
                queue.push_back(GlobalMarker { positions, payload });
                Ok(())
            }
        }
    }

    /// Forwards every ready marker to the sink, in arrival order, and
    /// returns how many were delivered.
    ///
    /// A marker is dequeued only after the sink accepts it; a failed
    /// delivery leaves the marker at the head of its queue and surfaces
    /// the error, so the next flush re-attempts it. A no-op while the mode
    /// is unset. Concurrent calls serialize on the coordinator lock.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::Delivery`] if the sink rejects a payload.
    /// - [`CheckpointError::Stream`] if a queued marker references a stream
    ///   the registry no longer resolves.
    pub async fn flush_ready(&self) -> Result<usize, CheckpointError> {
        let mut queues = self.queues.lock().await;
        let flushed = match &mut *queues {
            CheckpointQueues::Unset => 0,
            CheckpointQueues::Stream(map) => self.flush_stream_queues(map).await?,
            CheckpointQueues::Global(queue) => self.flush_global_queue(queue).await?,
        };
        *self.last_flush.lock() = Instant::now();
        if flushed > 0 {
            debug!(flushed, "checkpoint flush released markers");
        }
        Ok(flushed)
    }

    /// Returns the head-of-queue index per stream: the next positions that
    /// would flush once persisted. Empty while the mode is unset.
    ///
    /// Intended for stall diagnostics: a stream that keeps the same next
    /// index across flushes identifies the writer holding the sync back.
    pub async fn next_checkpoint_indexes(&self) -> FxHashMap<StreamKey, u64> {
        let queues = self.queues.lock().await;
        match &*queues {
            CheckpointQueues::Unset => FxHashMap::default(),
            CheckpointQueues::Stream(map) => map
                .iter()
                .filter_map(|(stream, queue)| {
                    queue.front().map(|marker| (stream.clone(), marker.index))
                })
                .collect(),
            CheckpointQueues::Global(queue) => queue
                .front()
                .map(|marker| marker.positions.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Returns the checkpoint mode, or `None` while no marker has arrived.
    pub async fn mode(&self) -> Option<CheckpointMode> {
        match &*self.queues.lock().await {
            CheckpointQueues::Unset => None,
            CheckpointQueues::Stream(_) => Some(CheckpointMode::Stream),
            CheckpointQueues::Global(_) => Some(CheckpointMode::Global),
        }
    }

    /// Returns the instant the last [`flush_ready`](Self::flush_ready)
    /// call completed, initialized at construction.
    #[must_use]
    pub fn last_successful_flush(&self) -> Instant {
        *self.last_flush.lock()
    }

    fn push_stream_marker(
        map: &mut FxHashMap<StreamKey, VecDeque<StreamMarker<T>>>,
        stream: &StreamKey,
        index: u64,
        payload: T,
    ) -> Result<(), CheckpointError> {
        let queue = map.entry(stream.clone()).or_default();
        if let Some(last) = queue.back() {
            if last.index > index {
                return Err(CheckpointError::OutOfOrder {
                    stream: stream.clone(),
                    queued: last.index,
                    received: index,
                });
            }
        }
        queue.push_back(StreamMarker { index, payload });
        Ok(())
    }

    async fn flush_stream_queues(
        &self,
        map: &mut FxHashMap<StreamKey, VecDeque<StreamMarker<T>>>,
    ) -> Result<usize, CheckpointError> {
        let mut flushed = 0;
        let streams: Vec<StreamKey> = map.keys().cloned().collect();
        for stream in streams {
            let tracker = self.registry.get(&stream)?;
            let Some(queue) = map.get_mut(&stream) else {
                continue;
            };
            while let Some(head) = queue.front() {
                if !tracker.are_records_persisted_until(head.index) {
                    // The head gap blocks everything behind it for this
                    // stream, but not the other streams.
                    break;
                }
                self.sink.emit(&head.payload).await?;
                trace!(stream = %stream, index = head.index, "checkpoint marker forwarded");
                queue.pop_front();
                flushed += 1;
            }
            if queue.is_empty() {
                map.remove(&stream);
            }
        }
        Ok(flushed)
    }

    async fn flush_global_queue(
        &self,
        queue: &mut VecDeque<GlobalMarker<T>>,
    ) -> Result<usize, CheckpointError> {
        let mut flushed = 0;
        'queue: while let Some(head) = queue.front() {
            for (stream, index) in &head.positions {
                let tracker = self.registry.get(stream)?;
                if !tracker.are_records_persisted_until(*index) {
                    break 'queue;
                }
            }
            self.sink.emit(&head.payload).await?;
            trace!(
                positions = head.positions.len(),
                "global checkpoint marker forwarded"
            );
            queue.pop_front();
            flushed += 1;
        }
        Ok(flushed)
    }
}

impl<T> std::fmt::Debug for CheckpointCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCoordinator")
            .field("streams", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::checkpoint::error::SinkError;
    use async_trait::async_trait;

    struct VecSink {
        emitted: parking_lot::Mutex<Vec<u32>>,
    }

    impl VecSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                emitted: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CheckpointSink<u32> for VecSink {
        async fn emit(&self, payload: &u32) -> Result<(), SinkError> {
            self.emitted.lock().push(*payload);
            Ok(())
        }
    }

    fn setup() -> (Arc<StreamRegistry>, Arc<VecSink>, CheckpointCoordinator<u32>) {
        let registry = Arc::new(StreamRegistry::from_catalog(&Catalog::new(vec![
            StreamKey::unnamespaced("a"),
            StreamKey::unnamespaced("b"),
        ])));
        let sink = VecSink::new();
        let coordinator = CheckpointCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&sink) as Arc<dyn CheckpointSink<u32>>,
        );
        (registry, sink, coordinator)
    }

    #[tokio::test]
    async fn test_mode_is_fixed_by_first_marker() {
        let (_, _, coordinator) = setup();
        let a = StreamKey::unnamespaced("a");
        assert_eq!(coordinator.mode().await, None);

        coordinator.add_stream_checkpoint(&a, 1, 1).await.unwrap();
        assert_eq!(coordinator.mode().await, Some(CheckpointMode::Stream));

        let err = coordinator
            .add_global_checkpoint(vec![(a.clone(), 2)], 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::ModeConflict {
                active: CheckpointMode::Stream,
                received: CheckpointMode::Global,
            }
        ));
    }

    #[tokio::test]
    async fn test_global_then_stream_is_rejected() {
        let (_, _, coordinator) = setup();
        let a = StreamKey::unnamespaced("a");
        coordinator
            .add_global_checkpoint(vec![(a.clone(), 1)], 1)
            .await
            .unwrap();
        assert!(matches!(
            coordinator.add_stream_checkpoint(&a, 2, 2).await,
            Err(CheckpointError::ModeConflict {
                active: CheckpointMode::Global,
                received: CheckpointMode::Stream,
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_stream_is_rejected() {
        let (_, _, coordinator) = setup();
        let nope = StreamKey::unnamespaced("nope");
        assert!(matches!(
            coordinator.add_stream_checkpoint(&nope, 1, 1).await,
            Err(CheckpointError::Stream(_))
        ));
        assert!(matches!(
            coordinator.add_global_checkpoint(vec![(nope, 1)], 1).await,
            Err(CheckpointError::Stream(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_with_unset_mode_is_noop() {
        let (_, sink, coordinator) = setup();
        assert_eq!(coordinator.flush_ready().await.unwrap(), 0);
        assert!(sink.emitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_marker_queued() {
        struct FailingSink {
            fail: parking_lot::Mutex<bool>,
            emitted: parking_lot::Mutex<Vec<u32>>,
        }

        #[async_trait]
        impl CheckpointSink<u32> for FailingSink {
            async fn emit(&self, payload: &u32) -> Result<(), SinkError> {
                if *self.fail.lock() {
                    return Err(SinkError::new("downstream unavailable"));
                }
                self.emitted.lock().push(*payload);
                Ok(())
            }
        }

        let registry = Arc::new(StreamRegistry::from_catalog(&Catalog::new(vec![
            StreamKey::unnamespaced("a"),
        ])));
        let sink = Arc::new(FailingSink {
            fail: parking_lot::Mutex::new(true),
            emitted: parking_lot::Mutex::new(Vec::new()),
        });
        let coordinator = CheckpointCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&sink) as Arc<dyn CheckpointSink<u32>>,
        );

        let a = StreamKey::unnamespaced("a");
        let tracker = registry.get(&a).unwrap();
        for _ in 0..3 {
            tracker.increment_read_count().unwrap();
        }
        tracker.update_batch_state(0..3, crate::stream::BatchState::Persisted);
        coordinator.add_stream_checkpoint(&a, 3, 7).await.unwrap();

        assert!(matches!(
            coordinator.flush_ready().await,
            Err(CheckpointError::Delivery(_))
        ));
        assert!(sink.emitted.lock().is_empty());

        // The marker survived the failure; the retry delivers it once.
        *sink.fail.lock() = false;
        assert_eq!(coordinator.flush_ready().await.unwrap(), 1);
        assert_eq!(*sink.emitted.lock(), vec![7]);
        assert_eq!(coordinator.flush_ready().await.unwrap(), 0);
    }
}
