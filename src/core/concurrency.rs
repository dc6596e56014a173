//! Bounded concurrency for backend calls.
//!
//! [`ConcurrencyGate`] wraps a tokio [`Semaphore`] sized to the backend's
//! capacity. Waiters queue without bound. The [`GatePermit`] handed out by
//! [`ConcurrencyGate::acquire`] frees its slot exactly once, either through
//! [`GatePermit::release`] or when it is dropped, so handler errors and
//! client cancellation cannot leak a slot.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::error::{AppError, Result};
use crate::core::metrics::get_metrics;

#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` concurrent holders.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("concurrency gate closed".to_string()))?;
        get_metrics().backend_in_flight.inc();
        Ok(GatePermit {
            permit: Some(permit),
        })
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A held slot of a [`ConcurrencyGate`].
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl GatePermit {
    /// Free the slot now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            get_metrics().backend_in_flight.dec();
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("held", &self.permit.is_some())
            .finish()
    }
}
