//! # Memory Budget
//!
//! Blocking, variable-size admission control bounding the bytes of
//! concurrently in-flight work. Producers reserve before enqueuing and
//! release as batches drain, which back-pressures the whole pipeline into
//! a bounded memory envelope.
//!
//! This is a counting resource, not a unit semaphore: requests vary in
//! size, so wakeups are broadcast and every waiter re-checks the headroom
//! condition. FIFO fairness is deliberately not provided; it would need
//! priority-aware wakeup to avoid head-of-line blocking by one oversized
//! request.
//!
//! ## Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use sluice_core::memory::MemoryBudget;
//!
//! let budget = MemoryBudget::new(1024);
//! budget.reserve(512).await;
//! assert_eq!(budget.used(), 512);
//! budget.release(512);
//! assert_eq!(budget.available(), 1024);
//! # }
//! ```

pub mod detect;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Byte-budget admission controller shared by all producers of a sync.
///
/// The capacity is fixed at construction; [`reserve`](Self::reserve)
/// suspends callers until enough headroom exists. Cancelling a suspended
/// reservation has no side effects on the accounted total.
pub struct MemoryBudget {
    capacity: u64,
    used: Mutex<u64>,
    released: Notify,
}

impl MemoryBudget {
    /// Creates a budget with the given byte capacity.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: Mutex::new(0),
            released: Notify::new(),
        }
    }

    /// Creates a budget sized to the given fraction of total host memory.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn fraction_of_host(fraction: f64) -> Self {
        let capacity = (detect::host_memory_bytes() as f64 * fraction) as u64;
        Self::new(capacity)
    }

    /// Suspends until `used + bytes <= capacity`, then commits the
    /// reservation.
    ///
    /// No bound on `bytes` relative to the capacity is enforced here: a
    /// request larger than the capacity waits forever unless enough is
    /// released, so callers size requests sensibly. Cancellation-safe:
    /// dropping the future leaves the accounted total untouched.
    pub async fn reserve(&self, bytes: u64) {
        loop {
            // Register for the wakeup before checking headroom, so a
            // release landing between a failed check and the await below
            // cannot be missed.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            {
                let mut used = self.used.lock();
                if used.saturating_add(bytes) <= self.capacity {
                    *used += bytes;
                    return;
                }
                trace!(
                    bytes,
                    used = *used,
                    capacity = self.capacity,
                    "reservation waiting for headroom"
                );
            }
            released.as_mut().await;
        }
    }

    /// Reserves `floor(capacity * fraction)` bytes and returns the amount,
    /// suspending like [`reserve`](Self::reserve).
    ///
    /// Useful for sizing a dependent bounded queue as a share of the
    /// budget.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub async fn reserve_ratio(&self, fraction: f64) -> u64 {
        let bytes = (self.capacity as f64 * fraction).floor() as u64;
        self.reserve(bytes).await;
        bytes
    }

    /// Returns `bytes` to the budget and wakes all waiters to re-check
    /// their headroom condition.
    ///
    /// Releasing more than is currently reserved clamps the accounted
    /// total to zero rather than underflowing.
    pub fn release(&self, bytes: u64) {
        {
            let mut used = self.used.lock();
            if bytes > *used {
                warn!(bytes, used = *used, "released more than reserved; clamping");
                *used = 0;
            } else {
                *used -= bytes;
            }
        }
        self.released.notify_waiters();
    }

    /// Returns the bytes currently reserved.
    #[must_use]
    pub fn used(&self) -> u64 {
        *self.used.lock()
    }

    /// Returns the total byte capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the bytes currently available for reservation.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.capacity - *self.used.lock()
    }
}

impl std::fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("capacity", &self.capacity)
            .field("used", &*self.used.lock())
            .finish_non_exhaustive()
    }
}

/// RAII reservation handle that returns its bytes to the budget on drop.
///
/// Obtained from [`MemoryReservation::acquire`]; tying release to scope
/// exit keeps the accounting correct on every early-return and panic path
/// of a batch's lifecycle.
pub struct MemoryReservation {
    budget: Arc<MemoryBudget>,
    bytes: u64,
}

impl MemoryReservation {
    /// Reserves `bytes` from `budget`, suspending like
    /// [`MemoryBudget::reserve`], and returns a guard that releases them
    /// on drop.
    pub async fn acquire(budget: &Arc<MemoryBudget>, bytes: u64) -> Self {
        budget.reserve(bytes).await;
        Self {
            budget: Arc::clone(budget),
            bytes,
        }
    }

    /// Returns the reserved byte count.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

impl std::fmt::Debug for MemoryReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryReservation")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reserve_within_capacity_is_immediate() {
        let budget = MemoryBudget::new(100);
        budget.reserve(60).await;
        budget.reserve(40).await;
        assert_eq!(budget.used(), 100);
        assert_eq!(budget.available(), 0);
    }

    #[tokio::test]
    async fn test_reserve_blocks_until_release() {
        let budget = Arc::new(MemoryBudget::new(100));
        budget.reserve(80).await;

        let waiter = {
            let budget = Arc::clone(&budget);
            tokio::spawn(async move { budget.reserve(50).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        budget.release(80);
        waiter.await.unwrap();
        assert_eq!(budget.used(), 50);
    }

    #[tokio::test]
    async fn test_oversized_request_waits_indefinitely() {
        let budget = MemoryBudget::new(100);
        let result = tokio::time::timeout(Duration::from_millis(50), budget.reserve(200)).await;
        assert!(result.is_err());
        // The cancelled reservation left no trace in the accounting.
        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_accounting() {
        let budget = Arc::new(MemoryBudget::new(100));
        budget.reserve(100).await;

        let result = tokio::time::timeout(Duration::from_millis(50), budget.reserve(10)).await;
        assert!(result.is_err());
        assert_eq!(budget.used(), 100);

        // Headroom created after the cancellation serves later callers.
        budget.release(100);
        budget.reserve(10).await;
        assert_eq!(budget.used(), 10);
    }

    #[tokio::test]
    async fn test_reserve_ratio_floors() {
        let budget = MemoryBudget::new(1000);
        assert_eq!(budget.reserve_ratio(0.333).await, 333);
        assert_eq!(budget.used(), 333);
    }

    #[tokio::test]
    async fn test_release_clamps_to_zero() {
        let budget = MemoryBudget::new(100);
        budget.reserve(10).await;
        budget.release(50);
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.available(), 100);
    }

    #[tokio::test]
    async fn test_reservation_guard_releases_on_drop() {
        let budget = Arc::new(MemoryBudget::new(100));
        {
            let reservation = MemoryReservation::acquire(&budget, 40).await;
            assert_eq!(reservation.bytes(), 40);
            assert_eq!(budget.used(), 40);
        }
        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_stay_within_capacity() {
        let budget = Arc::new(MemoryBudget::new(100));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let budget = Arc::clone(&budget);
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    budget.reserve(30).await;
                    // Granted reservations never exceed the capacity.
                    assert!(budget.used() <= budget.capacity());
                    tokio::task::yield_now().await;
                    budget.release(30);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(budget.used(), 0);
    }
}
