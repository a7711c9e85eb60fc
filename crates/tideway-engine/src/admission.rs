// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded admission pool for concurrent upstream completions.
//!
//! Acquisition is non-blocking: a full pool rejects immediately with
//! [`TidewayError::Overloaded`] and no queuing. The permit is RAII, so the
//! slot is released on every exit path of the holder.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use tideway_core::TidewayError;

/// Fixed-capacity counting semaphore sized by `limits.thread_num`.
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot now or fail with `Overloaded`.
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, TidewayError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(_) => {
                debug!(capacity = self.capacity, "admission pool full");
                Err(TidewayError::Overloaded)
            }
        }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_one_rejects_the_second_caller() {
        let pool = AdmissionPool::new(1);
        let permit = pool.try_acquire().unwrap();
        assert!(matches!(pool.try_acquire(), Err(TidewayError::Overloaded)));
        drop(permit);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn permits_release_on_drop_along_any_path() {
        let pool = AdmissionPool::new(2);
        {
            let _a = pool.try_acquire().unwrap();
            let _b = pool.try_acquire().unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn available_tracks_outstanding_permits() {
        let pool = AdmissionPool::new(3);
        let _one = pool.try_acquire().unwrap();
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.capacity(), 3);
    }
}
