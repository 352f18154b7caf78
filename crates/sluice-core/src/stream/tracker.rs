//! Per-stream record counting and batch-completion tracking.
//!
//! One [`StreamTracker`] exists per catalog stream for the duration of a
//! sync. Producer tasks count records in; batch-writer tasks report back
//! the index ranges they have durably written via
//! [`update_batch_state`](StreamTracker::update_batch_state); the
//! checkpoint coordinator asks whether a prefix of the stream is persisted
//! before releasing acknowledgement markers.

use std::ops::Range;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::catalog::StreamKey;

use super::error::StreamError;
use super::interval::IndexRangeSet;

/// How far a batch of records has progressed through the write pipeline.
///
/// The set of states is closed and totally ordered by implication: a batch
/// that is [`Complete`](Self::Complete) is necessarily
/// [`Persisted`](Self::Persisted), and so on down the chain. The tracker
/// exploits this by unioning every reported range into the tracker of each
/// implied state, so durability queries compose across mixed reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchState {
    /// Records are buffered in memory, not yet handed to a writer.
    Accumulating,
    /// Records are staged in intermediate storage (local file, staging
    /// table) but not yet durable at the destination.
    Staged,
    /// Records are durably written; loss of the connector no longer loses
    /// data. This is the watermark checkpointing keys on.
    Persisted,
    /// Records are persisted and all post-processing (finalization, dedup)
    /// has finished.
    Complete,
}

impl BatchState {
    /// All states, in implication order (weakest first).
    pub const ALL: [Self; 4] = [
        Self::Accumulating,
        Self::Staged,
        Self::Persisted,
        Self::Complete,
    ];

    fn slot(self) -> usize {
        match self {
            Self::Accumulating => 0,
            Self::Staged => 1,
            Self::Persisted => 2,
            Self::Complete => 3,
        }
    }
}

/// Terminal outcome of a stream's processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The stream's writer finished after end-of-stream was counted.
    Succeeded,
    /// The stream's writer aborted before finishing.
    Failed {
        /// Human-readable cause, for sync teardown diagnostics.
        reason: String,
    },
}

/// Mutable per-stream state, guarded by one per-stream lock so unrelated
/// streams never contend.
struct TrackerInner {
    /// Records counted in so far; the next record gets this index.
    records_read: u64,
    /// Whether end-of-stream has been counted.
    end_of_stream: bool,
    /// Record count at the last checkpoint mark.
    last_checkpoint_at: u64,
    /// One coalescing range set per batch state.
    ranges: [IndexRangeSet; 4],
}

/// Record and completion bookkeeping for one logical stream.
///
/// Record counting assumes a single producer per stream;
/// [`update_batch_state`](Self::update_batch_state) is safe under
/// concurrent writer tasks (set union is commutative and idempotent).
pub struct StreamTracker {
    key: StreamKey,
    inner: Mutex<TrackerInner>,
    closed_tx: watch::Sender<Option<StreamOutcome>>,
    closed_rx: watch::Receiver<Option<StreamOutcome>>,
}

impl StreamTracker {
    /// Creates a tracker for the given stream with zero records counted.
    #[must_use]
    pub fn new(key: StreamKey) -> Self {
        let (closed_tx, closed_rx) = watch::channel(None);
        Self {
            key,
            inner: Mutex::new(TrackerInner {
                records_read: 0,
                end_of_stream: false,
                last_checkpoint_at: 0,
                ranges: [
                    IndexRangeSet::new(),
                    IndexRangeSet::new(),
                    IndexRangeSet::new(),
                    IndexRangeSet::new(),
                ],
            }),
            closed_tx,
            closed_rx,
        }
    }

    /// Returns the stream this tracker belongs to.
    #[must_use]
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Counts one record in and returns its index.
    ///
    /// Indexes are assigned gap-free from zero in call order (single
    /// producer per stream).
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::RecordAfterEndOfStream`] if end-of-stream was
    /// already counted.
    pub fn increment_read_count(&self) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock();
        if inner.end_of_stream {
            return Err(StreamError::RecordAfterEndOfStream {
                stream: self.key.clone(),
                read_count: inner.records_read,
            });
        }
        let index = inner.records_read;
        inner.records_read += 1;
        Ok(index)
    }

    /// Counts end-of-stream and returns the final record count (one past
    /// the last real record).
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::EndOfStreamAlreadySet`] on a second call.
    pub fn mark_end_of_stream(&self) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock();
        if inner.end_of_stream {
            return Err(StreamError::EndOfStreamAlreadySet {
                stream: self.key.clone(),
                read_count: inner.records_read,
            });
        }
        inner.end_of_stream = true;
        debug!(stream = %self.key, records = inner.records_read, "end-of-stream counted");
        Ok(inner.records_read)
    }

    /// Returns the number of records counted so far.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.inner.lock().records_read
    }

    /// Marks a checkpoint boundary.
    ///
    /// Returns `(current index, records counted since the previous mark)`.
    /// Not safe for concurrent callers; each stream has a single
    /// checkpoint-issuing task.
    pub fn mark_checkpoint(&self) -> (u64, u64) {
        let mut inner = self.inner.lock();
        let index = inner.records_read;
        let delta = index - inner.last_checkpoint_at;
        inner.last_checkpoint_at = index;
        (index, delta)
    }

    /// Records that the records in `range` have reached `state`.
    ///
    /// The range is unioned into the tracker of `state` and of every state
    /// it implies, so a `Complete` report also advances the `Persisted`
    /// watermark. Reports may arrive in any order and may overlap.
    pub fn update_batch_state(&self, range: Range<u64>, state: BatchState) {
        let mut inner = self.inner.lock();
        for implied in BatchState::ALL {
            if state >= implied {
                inner.ranges[implied.slot()].add(range.clone());
            }
        }
    }

    /// Returns whether every record of the stream has reached
    /// [`BatchState::Complete`].
    ///
    /// True iff end-of-stream has been counted and the complete tracker
    /// covers `[0, read_count)`; trivially true for an empty stream whose
    /// end-of-stream was counted.
    #[must_use]
    pub fn is_batch_processing_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.end_of_stream
            && inner.ranges[BatchState::Complete.slot()].covers_prefix(inner.records_read)
    }

    /// Returns whether records `[0, n)` are durably persisted.
    ///
    /// Monotonic: once true for a given `n`, it stays true for the rest of
    /// the sync, since ranges only ever grow.
    #[must_use]
    pub fn are_records_persisted_until(&self, n: u64) -> bool {
        self.inner.lock().ranges[BatchState::Persisted.slot()].covers_prefix(n)
    }

    /// Marks the stream's processing as finished, waking all
    /// [`await_closed`](Self::await_closed) waiters.
    ///
    /// Idempotent after the first terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ClosedBeforeEndOfStream`] if end-of-stream
    /// has not been counted yet.
    pub fn mark_closed(&self) -> Result<(), StreamError> {
        if !self.inner.lock().end_of_stream {
            return Err(StreamError::ClosedBeforeEndOfStream {
                stream: self.key.clone(),
            });
        }
        if self.terminate(StreamOutcome::Succeeded) {
            debug!(stream = %self.key, "stream closed");
        }
        Ok(())
    }

    /// Marks the stream's processing as failed, waking all waiters.
    ///
    /// Unlike [`mark_closed`](Self::mark_closed), failure does not require
    /// end-of-stream: a writer abort short-circuits the stream. The first
    /// terminal outcome wins; later calls are no-ops.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.terminate(StreamOutcome::Failed {
            reason: reason.clone(),
        }) {
            debug!(stream = %self.key, reason = %reason, "stream failed");
        }
    }

    /// Returns whether a terminal outcome has been recorded.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_rx.borrow().is_some()
    }

    /// Suspends until a terminal outcome is recorded, returning it.
    ///
    /// Returns immediately if the stream already closed or failed.
    /// Cancellation-safe: dropping the future has no side effects.
    ///
    /// # Panics
    ///
    /// Does not panic in practice: the tracker owns the signal sender, so
    /// the channel cannot close while `self` is alive.
    pub async fn await_closed(&self) -> StreamOutcome {
        let mut rx = self.closed_rx.clone();
        let slot = rx
            .wait_for(Option::is_some)
            .await
            .expect("closed-signal sender is owned by the tracker");
        slot.clone().expect("wait_for guarantees a terminal outcome")
    }

    /// Records `outcome` if no terminal outcome exists yet. Returns whether
    /// this call won.
    fn terminate(&self, outcome: StreamOutcome) -> bool {
        self.closed_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        })
    }
}

impl std::fmt::Debug for StreamTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StreamTracker")
            .field("key", &self.key)
            .field("records_read", &inner.records_read)
            .field("end_of_stream", &inner.end_of_stream)
            .field("closed", &self.closed_rx.borrow().is_some())
            .finish_non_exhaustive()
    }
}
