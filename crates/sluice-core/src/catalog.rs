//! Stream identities and the sync catalog.
//!
//! A [`StreamKey`] names one logical stream (optionally namespaced). The
//! [`Catalog`] is the fixed set of streams a sync will move, handed to the
//! core at startup so the registry can pre-build one tracker per stream.

use std::fmt;

/// Identity of a logical stream.
///
/// Equality and hashing are purely structural; the key carries no
/// configuration. Keys are cheap to clone and are used to address trackers,
/// checkpoint queues, and loader handles.
///
/// # Example
///
/// ```rust
/// use sluice_core::StreamKey;
///
/// let users = StreamKey::new("public", "users");
/// let events = StreamKey::unnamespaced("events");
///
/// assert_eq!(users.to_string(), "public.users");
/// assert_eq!(events.to_string(), "events");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// Optional namespace (schema, topic prefix, dataset), if the source
    /// distinguishes one.
    pub namespace: Option<String>,
    /// Stream name, unique within its namespace.
    pub name: String,
}

impl StreamKey {
    /// Creates a namespaced stream key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Creates a stream key with no namespace.
    #[must_use]
    pub fn unnamespaced(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The set of streams known to a sync, fixed at startup.
///
/// The catalog is the startup boundary: it is produced by configuration
/// parsing (out of scope for this crate) and consumed once to build the
/// [`StreamRegistry`](crate::stream::StreamRegistry). Streams not present
/// here are protocol violations everywhere else in the core.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    streams: Vec<StreamKey>,
}

impl Catalog {
    /// Creates a catalog from the given stream keys.
    ///
    /// Duplicate keys are collapsed; order is preserved for the first
    /// occurrence.
    #[must_use]
    pub fn new(streams: Vec<StreamKey>) -> Self {
        let mut seen = fxhash::FxHashSet::default();
        let streams = streams
            .into_iter()
            .filter(|s| seen.insert(s.clone()))
            .collect();
        Self { streams }
    }

    /// Returns the streams in catalog order.
    #[must_use]
    pub fn streams(&self) -> &[StreamKey] {
        &self.streams
    }

    /// Returns whether the catalog contains the given stream.
    #[must_use]
    pub fn contains(&self, key: &StreamKey) -> bool {
        self.streams.iter().any(|s| s == key)
    }

    /// Returns the number of streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
