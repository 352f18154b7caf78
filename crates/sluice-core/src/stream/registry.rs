//! Stream registry: tracker lookup, loader rendezvous, sync-wide fan-in.
//!
//! The registry is built once from the catalog at sync start and is
//! immutable thereafter; all mutability lives inside the per-stream
//! trackers, so lookups never contend.

use std::sync::Arc;

use fxhash::FxHashMap;
use tokio::sync::watch;

use crate::catalog::{Catalog, StreamKey};

use super::error::StreamError;
use super::tracker::StreamTracker;

/// Handle published by a stream's writer task once it is ready to accept
/// work for that stream.
///
/// The core treats the handle as opaque; it only brokers the rendezvous
/// between the one task that registers it and the tasks that await it.
pub trait StreamLoader: Send + Sync {
    /// The stream this loader writes.
    fn stream(&self) -> &StreamKey;
}

/// Per-stream registry slot: the tracker plus the single-assignment loader
/// rendezvous.
struct StreamSlot {
    tracker: Arc<StreamTracker>,
    loader_tx: watch::Sender<Option<Arc<dyn StreamLoader>>>,
    loader_rx: watch::Receiver<Option<Arc<dyn StreamLoader>>>,
}

/// Lookup from stream identity to tracker, plus loader-handle rendezvous
/// and the sync-wide "all streams done" wait.
pub struct StreamRegistry {
    streams: FxHashMap<StreamKey, StreamSlot>,
}

impl StreamRegistry {
    /// Builds the registry from the sync catalog, creating one tracker per
    /// stream.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let streams = catalog
            .streams()
            .iter()
            .map(|key| {
                let (loader_tx, loader_rx) = watch::channel(None);
                let slot = StreamSlot {
                    tracker: Arc::new(StreamTracker::new(key.clone())),
                    loader_tx,
                    loader_rx,
                };
                (key.clone(), slot)
            })
            .collect();
        Self { streams }
    }

    /// Looks up the tracker for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] for keys not in the catalog,
    /// a protocol/configuration violation that is fatal to the sync.
    pub fn get(&self, key: &StreamKey) -> Result<Arc<StreamTracker>, StreamError> {
        self.streams
            .get(key)
            .map(|slot| Arc::clone(&slot.tracker))
            .ok_or_else(|| StreamError::UnknownStream {
                stream: key.clone(),
            })
    }

    /// Publishes the loader handle for `key`, waking every
    /// [`await_loader`](Self::await_loader) call for that stream.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] for keys not in the catalog
    /// and [`StreamError::LoaderAlreadyRegistered`] on a second
    /// registration (exactly one setter per stream).
    pub fn register_loader(
        &self,
        key: &StreamKey,
        loader: Arc<dyn StreamLoader>,
    ) -> Result<(), StreamError> {
        let slot = self
            .streams
            .get(key)
            .ok_or_else(|| StreamError::UnknownStream {
                stream: key.clone(),
            })?;
        // Test-and-set under the channel lock so two racing registrations
        // cannot both win.
        let won = slot.loader_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(loader);
                true
            } else {
                false
            }
        });
        if won {
            Ok(())
        } else {
            Err(StreamError::LoaderAlreadyRegistered {
                stream: key.clone(),
            })
        }
    }

    /// Suspends until the loader handle for `key` has been registered,
    /// returning it. Multiple awaiters are allowed; all observe the same
    /// handle. Cancellation-safe.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] for keys not in the catalog.
    ///
    /// # Panics
    ///
    /// Does not panic in practice: the registry owns the rendezvous sender,
    /// so the channel cannot close while `self` is alive.
    pub async fn await_loader(
        &self,
        key: &StreamKey,
    ) -> Result<Arc<dyn StreamLoader>, StreamError> {
        let slot = self
            .streams
            .get(key)
            .ok_or_else(|| StreamError::UnknownStream {
                stream: key.clone(),
            })?;
        let mut rx = slot.loader_rx.clone();
        let current = rx
            .wait_for(Option::is_some)
            .await
            .expect("loader-rendezvous sender is owned by the registry");
        Ok(Arc::clone(
            current.as_ref().expect("wait_for guarantees a handle"),
        ))
    }

    /// Suspends until every registered tracker reports a terminal outcome.
    ///
    /// Implemented as a fan-in wait over the individual trackers rather
    /// than one shared signal, so per-stream progress stays independently
    /// observable. Cancellation-safe.
    pub async fn await_all_closed(&self) {
        for slot in self.streams.values() {
            slot.tracker.await_closed().await;
        }
    }

    /// Iterates over all trackers.
    pub fn trackers(&self) -> impl Iterator<Item = &Arc<StreamTracker>> {
        self.streams.values().map(|slot| &slot.tracker)
    }

    /// Returns the number of registered streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLoader {
        key: StreamKey,
    }

    impl StreamLoader for TestLoader {
        fn stream(&self) -> &StreamKey {
            &self.key
        }
    }

    fn registry() -> StreamRegistry {
        StreamRegistry::from_catalog(&Catalog::new(vec![
            StreamKey::unnamespaced("a"),
            StreamKey::unnamespaced("b"),
        ]))
    }

    #[test]
    fn test_get_known_and_unknown_streams() {
        let registry = registry();
        let a = StreamKey::unnamespaced("a");
        assert_eq!(registry.get(&a).unwrap().key(), &a);
        assert!(matches!(
            registry.get(&StreamKey::unnamespaced("nope")),
            Err(StreamError::UnknownStream { .. })
        ));
    }

    #[tokio::test]
    async fn test_loader_rendezvous_multiple_awaiters() {
        let registry = Arc::new(registry());
        let a = StreamKey::unnamespaced("a");

        let mut awaiters = Vec::new();
        for _ in 0..3 {
            let registry = Arc::clone(&registry);
            let key = a.clone();
            awaiters.push(tokio::spawn(async move {
                registry.await_loader(&key).await.unwrap().stream().clone()
            }));
        }
        tokio::task::yield_now().await;
        assert!(awaiters.iter().all(|handle| !handle.is_finished()));

        registry
            .register_loader(&a, Arc::new(TestLoader { key: a.clone() }))
            .unwrap();
        for handle in awaiters {
            assert_eq!(handle.await.unwrap(), a);
        }
    }

    #[tokio::test]
    async fn test_loader_registered_before_await() {
        let registry = registry();
        let b = StreamKey::unnamespaced("b");
        registry
            .register_loader(&b, Arc::new(TestLoader { key: b.clone() }))
            .unwrap();
        assert_eq!(registry.await_loader(&b).await.unwrap().stream(), &b);
    }

    #[test]
    fn test_double_loader_registration_fails() {
        let registry = registry();
        let a = StreamKey::unnamespaced("a");
        registry
            .register_loader(&a, Arc::new(TestLoader { key: a.clone() }))
            .unwrap();
        assert!(matches!(
            registry.register_loader(&a, Arc::new(TestLoader { key: a.clone() })),
            Err(StreamError::LoaderAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_loader_registration_unknown_stream_fails() {
        let registry = registry();
        let nope = StreamKey::unnamespaced("nope");
        assert!(matches!(
            registry.register_loader(&nope, Arc::new(TestLoader { key: nope.clone() })),
            Err(StreamError::UnknownStream { .. })
        ));
    }

    #[tokio::test]
    async fn test_await_all_closed_waits_for_every_stream() {
        let registry = Arc::new(registry());
        let a = StreamKey::unnamespaced("a");
        let b = StreamKey::unnamespaced("b");

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_all_closed().await })
        };

        registry.get(&a).unwrap().mark_end_of_stream().unwrap();
        registry.get(&a).unwrap().mark_closed().unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.get(&b).unwrap().mark_end_of_stream().unwrap();
        registry.get(&b).unwrap().mark_closed().unwrap();
        waiter.await.unwrap();
    }
}
