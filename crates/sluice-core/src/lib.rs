//! # Sluice Core
//!
//! Checkpoint and completion tracking for the Sluice extract-load
//! pipeline: the coordination layer that knows, at any moment, up to which
//! record index each stream is durably written, and releases checkpoint
//! acknowledgements upstream only once that guarantee holds.
//!
//! This crate provides:
//! - **Stream tracking**: per-stream record counting and batch-completion
//!   interval trackers ([`stream`])
//! - **Checkpoint coordination**: ordered, mode-exclusive release of
//!   opaque acknowledgement markers ([`checkpoint`])
//! - **Registry**: tracker lookup, writer rendezvous, and the sync-wide
//!   completion wait ([`stream::StreamRegistry`])
//! - **Memory budget**: blocking byte-level admission control for
//!   in-flight work ([`memory`])
//!
//! Wire protocol parsing, the physical batch writers, configuration, and
//! the process entry point are external collaborators reached through the
//! narrow boundaries defined here (`CheckpointSink`, `StreamLoader`, the
//! catalog).
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice_core::{Catalog, StreamKey};
//! use sluice_core::checkpoint::CheckpointCoordinator;
//! use sluice_core::stream::{BatchState, StreamRegistry};
//!
//! let catalog = Catalog::new(vec![StreamKey::new("public", "users")]);
//! let registry = Arc::new(StreamRegistry::from_catalog(&catalog));
//! let coordinator = CheckpointCoordinator::new(Arc::clone(&registry), sink);
//!
//! // Producer counts records in; a writer later reports them persisted;
//! // the coordinator forwards the buffered marker on the next flush.
//! let tracker = registry.get(&StreamKey::new("public", "users"))?;
//! let index = tracker.increment_read_count()?;
//! tracker.update_batch_state(0..index + 1, BatchState::Persisted);
//! coordinator.flush_ready().await?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod checkpoint;
pub mod memory;
pub mod stream;

pub use catalog::{Catalog, StreamKey};

/// Result type for sluice-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for sluice-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream tracking or registry errors.
    #[error("stream error: {0}")]
    Stream(#[from] stream::StreamError),

    /// Checkpoint ordering, mode, or delivery errors.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),
}
