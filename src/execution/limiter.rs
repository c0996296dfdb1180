//! Concurrency Limiter
//!
//! A counting permit primitive bounding how many steps may be in flight at
//! once. Waiters are served in FIFO order. Permits are returned by dropping
//! the [`Permit`] guard, so a permit can never be released twice and the
//! available count can never exceed the capacity.

use std::sync::Arc;

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// FIFO-fair counting semaphore with a fixed capacity.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held permit. Dropping it releases the permit to the next waiter.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

impl Permit {
    /// Returns the permit explicitly. Equivalent to dropping it.
    pub fn release(self) {}
}

impl ConcurrencyLimiter {
    /// Creates a limiter with `permits` slots. A capacity of 0 is raised to 1.
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits until a permit is available and takes it.
    ///
    /// Waiters acquire in the order they called `acquire`.
    pub async fn acquire(&self) -> Permit {
        let inner = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("concurrency limiter semaphore is never closed");
        debug!(
            "Permit acquired ({}/{} in use)",
            self.in_use(),
            self.capacity
        );
        Permit { _inner: inner }
    }

    /// Takes a permit if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|inner| Permit { _inner: inner })
    }

    /// Number of permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
