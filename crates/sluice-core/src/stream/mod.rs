//! # Stream Tracking
//!
//! Per-stream completion bookkeeping for a sync:
//!
//! - [`IndexRangeSet`] — coalescing set of record-index ranges
//! - [`StreamTracker`] — record counter, end-of-stream flag, per-state
//!   range trackers, terminal closed signal
//! - [`StreamRegistry`] — catalog-built lookup, loader-handle rendezvous,
//!   sync-wide fan-in wait
//!
//! ## Concurrency
//!
//! Each tracker guards its state with its own lock, so unrelated streams
//! never contend. Record counting assumes a single producer per stream;
//! batch-state updates are commutative unions and safe under concurrent
//! writer tasks.
//!
//! ## Example
//!
//! ```rust
//! use sluice_core::stream::{BatchState, StreamTracker};
//! use sluice_core::StreamKey;
//!
//! let tracker = StreamTracker::new(StreamKey::unnamespaced("orders"));
//! for _ in 0..3 {
//!     tracker.increment_read_count().unwrap();
//! }
//!
//! // A writer reports the whole prefix durable.
//! tracker.update_batch_state(0..3, BatchState::Persisted);
//! assert!(tracker.are_records_persisted_until(3));
//! ```

pub mod error;
pub mod interval;
pub mod registry;
pub mod tracker;

pub use error::StreamError;
pub use interval::IndexRangeSet;
pub use registry::{StreamLoader, StreamRegistry};
pub use tracker::{BatchState, StreamOutcome, StreamTracker};
