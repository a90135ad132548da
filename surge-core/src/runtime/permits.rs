//! Concurrency permits with RAII release

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A fixed pool of concurrency permits
#[derive(Debug)]
pub struct Permits {
    total: usize,
    available: AtomicUsize,
}

impl Permits {
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self { total, available: AtomicUsize::new(total) })
    }

    /// Take one permit if any is free
    pub fn try_acquire(self: &Arc<Self>) -> Option<PermitGuard> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| PermitGuard { permits: self.clone() })
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn in_use(&self) -> usize {
        self.total - self.available()
    }
}

/// A held permit; returned to the pool when dropped
#[derive(Debug)]
pub struct PermitGuard {
    permits: Arc<Permits>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        self.permits.available.fetch_add(1, Ordering::AcqRel);
    }
}
