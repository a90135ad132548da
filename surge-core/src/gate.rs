//! Credit-based backpressure gate
//!
//! Sits between a fast producer and a capacity-limited consumer. Tasks wait in
//! a bounded backlog; each one runs only after taking a credit from a shared
//! pool, and credits enter the pool only through `grant`. The consumer calls
//! `grant(1)` after finishing each unit of work, which closes the loop: the
//! consumer never receives more concurrent work than it has authorized.
//!
//! ```text
//! producer ──enqueue──► backlog (bounded, blocks when full)
//!                          │
//!            drain: CAS-acquire credit, pop, hand off
//!                          ▼
//!                 worker pool (direct hand-off, caller-runs when saturated)
//!                          │
//! consumer ◄───────────────┘ ──grant(n)──► credit pool
//! ```
//!
//! `drain` runs after every `enqueue` and `grant`, possibly from several
//! threads at once. The compare-and-swap on the credit counter is the only
//! synchronization between threads: each credit is claimed by exactly one
//! drainer. Within one thread, drains do not nest.

use crate::config::GateConfig;
use crate::runtime::{BoundedQueue, PoolStats, WorkerPool};
use crate::{Result, TaskResult};
use serde::Serialize;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

thread_local! {
    /// Gates this thread is currently draining
    static DRAINING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a gate as being drained by the current thread until dropped
struct DrainGuard {
    gate: usize,
}

impl DrainGuard {
    fn enter(gate: &BackpressureGate) -> Option<Self> {
        let gate = gate as *const BackpressureGate as usize;
        DRAINING.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&gate) {
                None
            } else {
                active.push(gate);
                Some(Self { gate })
            }
        })
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|active| active.borrow_mut().retain(|g| *g != self.gate));
    }
}

/// A unit of gated work
pub type Task = Box<dyn FnOnce() -> TaskResult + Send>;

/// Credit totals since the gate was created
///
/// `granted == available + spent` holds whenever no drain is between claiming
/// a credit and either spending or returning it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CreditLedger {
    /// Initial credits plus every `grant`
    pub granted: u64,
    /// Credits currently in the pool
    pub available: u64,
    /// Credits consumed by tasks handed to execution
    pub spent: u64,
    /// Credits claimed by a drain that found the backlog empty and put back
    pub returned: u64,
}

impl CreditLedger {
    pub fn is_balanced(&self) -> bool {
        self.granted == self.available + self.spent
    }
}

pub struct BackpressureGate {
    credits: AtomicU64,
    granted: AtomicU64,
    spent: AtomicU64,
    returned: AtomicU64,
    backlog: BoundedQueue<Task>,
    pool: WorkerPool<Task>,
}

impl BackpressureGate {
    pub fn new(config: &GateConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            credits: AtomicU64::new(config.initial_credits),
            granted: AtomicU64::new(config.initial_credits),
            spent: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            backlog: BoundedQueue::new(config.queue_capacity)?,
            pool: WorkerPool::new("gate-worker", config.worker_pool_size, |task: Task| task())?,
        })
    }

    /// Offer a task, blocking while the backlog is full
    ///
    /// If the gate is shut down while waiting, the task is dropped and the
    /// loss is logged (at-most-once delivery).
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        if let Err(e) = self.backlog.push(Box::new(task)) {
            error!("Gate enqueue abandoned, task dropped: {}", e);
            return;
        }
        self.drain();
    }

    /// Add `n` credits and try to admit waiting tasks
    pub fn grant(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.granted.fetch_add(n, Ordering::AcqRel);
        self.credits.fetch_add(n, Ordering::AcqRel);
        self.drain();
    }

    /// Take one credit if the pool is non-empty
    fn try_acquire_credit(&self) -> bool {
        let mut current = self.credits.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.credits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn drain(&self) {
        // A caller-run task that grants or enqueues lands back here on the
        // same thread; the outer loop picks up its credit instead.
        let Some(_guard) = DrainGuard::enter(self) else { return };
        loop {
            if self.pool.is_shut_down() {
                return;
            }
            if !self.try_acquire_credit() {
                return;
            }
            let Some(task) = self.backlog.pop() else {
                // Nothing to spend it on
                self.credits.fetch_add(1, Ordering::AcqRel);
                self.returned.fetch_add(1, Ordering::Relaxed);
                // A task pushed while we held the credit saw an empty pool
                if self.backlog.is_empty() {
                    return;
                }
                continue;
            };
            self.spent.fetch_add(1, Ordering::AcqRel);
            if let Err(e) = self.pool.execute(task) {
                warn!("Gated task dropped: {}", e);
            }
        }
    }

    pub fn available_credits(&self) -> u64 {
        self.credits.load(Ordering::Acquire)
    }

    pub fn queue_depth(&self) -> usize {
        self.backlog.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.backlog.capacity()
    }

    /// Tasks dropped because the gate shut down while they waited for space
    pub fn abandoned(&self) -> u64 {
        self.backlog.abandoned()
    }

    pub fn ledger(&self) -> CreditLedger {
        CreditLedger {
            granted: self.granted.load(Ordering::Acquire),
            available: self.credits.load(Ordering::Acquire),
            spent: self.spent.load(Ordering::Acquire),
            returned: self.returned.load(Ordering::Acquire),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Release blocked producers and stop the worker pool
    ///
    /// Running tasks complete; queued tasks are not admitted any more.
    pub fn shutdown(&self) {
        self.backlog.close();
        self.pool.shutdown();
        debug!(
            "Gate shut down: {} tasks left in backlog, ledger {:?}",
            self.backlog.len(),
            self.ledger()
        );
    }
}
