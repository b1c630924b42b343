//! Admission control for computations in flight on one device.
//!
//! Each device owns an [`AdmissionSemaphore`] that bounds how many programs
//! the host may enqueue ahead of the device. Past a small number, enqueueing
//! more only grows queues without improving throughput.
//!
//! The semaphore is a plain capacity limiter: waiters are served in FIFO
//! order so none starves, and there is no priority between them. Acquisition
//! cannot fail, only wait. A slot is released by dropping the
//! [`AdmissionPermit`], which makes release unconditional on every exit path
//! of an execution, including failures after enqueueing.
//!
//! # Example
//!
//! ```
//! use ferrite_runtime::AdmissionSemaphore;
//!
//! let semaphore = AdmissionSemaphore::new(2);
//! let permit = semaphore.acquire_blocking();
//! assert_eq!(semaphore.in_flight(), 1);
//! drop(permit);
//! assert_eq!(semaphore.in_flight(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default in-flight capacity of a device on an asynchronous client.
pub const DEFAULT_ASYNC_INFLIGHT_CAPACITY: usize = 32;

/// In-flight capacity of a device on a synchronous client.
pub const SYNC_INFLIGHT_CAPACITY: usize = 1;

/// A counting gate bounding concurrently enqueued computations.
#[derive(Debug)]
pub struct AdmissionSemaphore {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

impl AdmissionSemaphore {
    /// Creates a semaphore with `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Reserves one slot, waiting while the device is saturated.
    pub async fn acquire(&self) -> AdmissionPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        self.admit(permit)
    }

    /// Reserves one slot, blocking the calling thread while saturated.
    pub fn acquire_blocking(&self) -> AdmissionPermit {
        pollster::block_on(self.acquire())
    }

    /// Reserves one slot without waiting.
    ///
    /// Returns `None` if the device is saturated.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);
        tracing::trace!(in_flight = current, capacity = self.capacity, "admitted computation");

        AdmissionPermit {
            in_flight: Arc::clone(&self.in_flight),
            _permit: permit,
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Returns the number of acquired slots.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Returns the peak number of acquired slots observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// One acquired slot. The slot is released when this is dropped.
#[must_use = "dropping the permit releases the admission slot immediately"]
pub struct AdmissionPermit {
    in_flight: Arc<AtomicUsize>,
    // Released after `Drop::drop` has decremented `in_flight`.
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_semaphore_creation() {
        let semaphore = AdmissionSemaphore::new(4);
        assert_eq!(semaphore.capacity(), 4);
        assert_eq!(semaphore.available(), 4);
        assert_eq!(semaphore.in_flight(), 0);
        assert_eq!(semaphore.peak_in_flight(), 0);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity() {
        AdmissionSemaphore::new(0);
    }

    #[pollster::test]
    async fn test_acquire_release() {
        let semaphore = AdmissionSemaphore::new(2);

        let permit1 = semaphore.acquire().await;
        let permit2 = semaphore.acquire().await;
        assert_eq!(semaphore.in_flight(), 2);
        assert_eq!(semaphore.available(), 0);

        drop(permit1);
        assert_eq!(semaphore.in_flight(), 1);
        assert_eq!(semaphore.available(), 1);

        drop(permit2);
        assert_eq!(semaphore.in_flight(), 0);
        assert_eq!(semaphore.available(), 2);
        assert_eq!(semaphore.peak_in_flight(), 2);
    }

    #[test]
    fn test_try_acquire_when_saturated() {
        let semaphore = AdmissionSemaphore::new(1);

        let permit = semaphore.try_acquire();
        assert!(permit.is_some());
        assert!(semaphore.try_acquire().is_none());

        drop(permit);
        assert!(semaphore.try_acquire().is_some());
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let semaphore = Arc::new(AdmissionSemaphore::new(1));
        let held = semaphore.acquire_blocking();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || {
                let _permit = semaphore.acquire_blocking();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(semaphore.in_flight(), 1);

        drop(held);
        rx.recv_timeout(Duration::from_secs(5))
            .expect("waiter should be admitted after release");
        waiter.join().unwrap();
        assert_eq!(semaphore.in_flight(), 0);
    }

    #[test]
    fn test_in_flight_never_exceeds_capacity() {
        let semaphore = Arc::new(AdmissionSemaphore::new(3));

        thread::scope(|scope| {
            for _ in 0..16 {
                let semaphore = Arc::clone(&semaphore);
                scope.spawn(move || {
                    for _ in 0..50 {
                        let _permit = semaphore.acquire_blocking();
                        assert!(semaphore.in_flight() <= semaphore.capacity());
                    }
                });
            }
        });

        assert_eq!(semaphore.in_flight(), 0);
        assert!(semaphore.peak_in_flight() <= 3);
    }
}
