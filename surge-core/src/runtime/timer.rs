//! Timer - single-threaded scheduler for admission decisions
//!
//! One background thread owns a min-heap of `(deadline, seq)` entries and runs
//! each job when its deadline passes. Every admission decision in the pipeline
//! (candidate evaluation, dispatcher ticks, metric windows) runs here, so those
//! decisions are serialized without locks while task execution happens on
//! worker pools.
//!
//! ## Architecture
//!
//! ```text
//! Timer (cloneable handle)
//! └── command channel ──► timer thread
//!                         └── Min-Heap of (deadline, seq) -> Job
//!                             ├── Once(FnOnce)
//!                             └── FixedRate(FnMut, period)
//! ```
//!
//! Jobs may schedule further jobs through a cloned `Timer`; the new entry is
//! picked up on the next loop iteration. Cancelling a handle asks the thread
//! to purge cancelled entries, so their closures are released right away
//! rather than at their deadline.

use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

enum Job {
    Once(Box<dyn FnOnce() + Send>),
    FixedRate { task: Box<dyn FnMut() + Send>, period: Duration },
}

/// Entry in the timer heap, ordered by deadline then insertion sequence
struct Entry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (BinaryHeap is max-heap by default)
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Command {
    Schedule(Entry),
    /// Drop every cancelled entry from the heap
    Purge,
    Shutdown,
}

/// Handle to a scheduled job
///
/// Cancelling prevents any future run of the job; a run already in progress
/// is not interrupted.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    timer: Weak<Shared>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        if let Some(shared) = self.timer.upgrade() {
            let _ = shared.tx.send(Command::Purge);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

struct Shared {
    tx: Sender<Command>,
    next_seq: AtomicU64,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Cloneable handle to the timer thread
#[derive(Clone)]
pub struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    /// Spawn the timer thread
    pub fn new(name: &str) -> Result<Self> {
        let (tx, rx) = unbounded();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(rx))?;

        Ok(Self {
            shared: Arc::new(Shared {
                tx,
                next_seq: AtomicU64::new(0),
                thread_id: join.thread().id(),
                join: Mutex::new(Some(join)),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Run `task` once at `deadline` (immediately if the deadline has passed)
    pub fn schedule_at<F>(&self, deadline: Instant, task: F) -> Result<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(deadline, Job::Once(Box::new(task)))
    }

    /// Run `task` once after `delay`
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> Result<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, task)
    }

    /// Run `task` at `first`, then every `period` after the previous deadline
    ///
    /// Deadlines advance by exactly `period` regardless of how long a run takes;
    /// if the thread falls behind, missed runs fire back to back.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        first: Instant,
        period: Duration,
        task: F,
    ) -> Result<TimerHandle>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::config("fixed-rate period must be > 0"));
        }
        self.submit(first, Job::FixedRate { task: Box::new(task), period })
    }

    fn submit(&self, deadline: Instant, job: Job) -> Result<TimerHandle> {
        if self.is_shut_down() {
            return Err(Error::Shutdown("timer".to_string()));
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            deadline,
            seq: self.shared.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
            cancelled: cancelled.clone(),
            job,
        };
        self.shared
            .tx
            .send(Command::Schedule(entry))
            .map_err(|_| Error::Shutdown("timer".to_string()))?;
        Ok(TimerHandle { cancelled, timer: Arc::downgrade(&self.shared) })
    }

    /// Whether the caller is running on the timer thread
    pub fn is_timer_thread(&self) -> bool {
        thread::current().id() == self.shared.thread_id
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(AtomicOrdering::Acquire)
    }

    /// Stop the timer thread and drop all pending jobs
    ///
    /// Idempotent. Joins the thread unless called from a job running on it.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        let _ = self.shared.tx.send(Command::Shutdown);
        if self.is_timer_thread() {
            return;
        }
        let handle = self.shared.join.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Timer thread panicked");
            }
        }
    }
}

fn run_loop(rx: Receiver<Command>) {
    let mut heap: BinaryHeap<Entry> = BinaryHeap::new();

    loop {
        let command = match heap.peek() {
            Some(next) => rx.recv_timeout(next.deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Schedule(entry)) => heap.push(entry),
            Ok(Command::Purge) => purge_cancelled(&mut heap),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        // Drain any other pending commands before firing so earlier deadlines win
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Schedule(entry) => heap.push(entry),
                Command::Purge => purge_cancelled(&mut heap),
                Command::Shutdown => {
                    debug!("Timer shutting down with {} pending jobs", heap.len());
                    return;
                }
            }
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|entry| entry.deadline <= now) {
            let Some(entry) = heap.pop() else { break };
            if entry.cancelled.load(AtomicOrdering::Acquire) {
                continue;
            }
            match entry.job {
                Job::Once(task) => {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("Timer job panicked");
                    }
                }
                Job::FixedRate { mut task, period } => {
                    if catch_unwind(AssertUnwindSafe(&mut task)).is_err() {
                        error!("Periodic timer job panicked");
                    }
                    if !entry.cancelled.load(AtomicOrdering::Acquire) {
                        heap.push(Entry {
                            deadline: entry.deadline + period,
                            seq: entry.seq,
                            cancelled: entry.cancelled,
                            job: Job::FixedRate { task, period },
                        });
                    }
                }
            }
        }
    }

    debug!("Timer shutting down with {} pending jobs", heap.len());
}

fn purge_cancelled(heap: &mut BinaryHeap<Entry>) {
    heap.retain(|entry| !entry.cancelled.load(AtomicOrdering::Acquire));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_in_deadline_order() {
        let timer = Timer::new("test-timer").unwrap();
        let (tx, rx) = unbounded();
        let base = Instant::now() + Duration::from_millis(20);

        for (offset, label) in [(30, "c"), (10, "a"), (20, "b")] {
            let tx = tx.clone();
            timer
                .schedule_at(base + Duration::from_millis(offset), move || {
                    tx.send(label).unwrap();
                })
                .unwrap();
        }

        let order: Vec<_> = (0..3).map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        timer.shutdown();
    }

    #[test]
    fn test_same_deadline_is_fifo() {
        let timer = Timer::new("test-timer").unwrap();
        let (tx, rx) = unbounded();
        let deadline = Instant::now() + Duration::from_millis(10);

        for i in 0..5 {
            let tx = tx.clone();
            timer.schedule_at(deadline, move || tx.send(i).unwrap()).unwrap();
        }

        let order: Vec<_> = (0..5).map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        timer.shutdown();
    }

    #[test]
    fn test_cancel_prevents_run() {
        let timer = Timer::new("test-timer").unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = timer
            .schedule_after(Duration::from_millis(50), move || flag.store(true, AtomicOrdering::SeqCst))
            .unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());

        thread::sleep(Duration::from_millis(120));
        assert!(!fired.load(AtomicOrdering::SeqCst), "Cancelled job must not run");
        timer.shutdown();
    }

    #[test]
    fn test_cancel_releases_job_before_deadline() {
        let timer = Timer::new("test-timer").unwrap();
        let captured = Arc::new(());
        let held = captured.clone();

        let handle = timer
            .schedule_after(Duration::from_secs(3_600), move || drop(held))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(Arc::strong_count(&captured), 2, "Pending job holds its closure");

        handle.cancel();
        let deadline = Instant::now() + Duration::from_secs(1);
        while Arc::strong_count(&captured) > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(&captured), 1, "Cancelled job must be dropped, not kept until its deadline");
        timer.shutdown();
    }

    #[test]
    fn test_fixed_rate_repeats_until_cancelled() {
        let timer = Timer::new("test-timer").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let handle = timer
            .schedule_at_fixed_rate(Instant::now(), Duration::from_millis(10), move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(105));
        handle.cancel();
        let at_cancel = count.load(AtomicOrdering::SeqCst);
        assert!(at_cancel >= 5, "Expected several periodic runs, got {}", at_cancel);

        thread::sleep(Duration::from_millis(50));
        assert!(count.load(AtomicOrdering::SeqCst) <= at_cancel + 1);
        timer.shutdown();
    }

    #[test]
    fn test_job_can_schedule_follow_up() {
        let timer = Timer::new("test-timer").unwrap();
        let (tx, rx) = unbounded();
        let inner_timer = timer.clone();

        timer
            .schedule_after(Duration::from_millis(5), move || {
                assert!(inner_timer.is_timer_thread());
                inner_timer
                    .schedule_after(Duration::from_millis(5), move || tx.send("follow-up").unwrap())
                    .unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "follow-up");
        timer.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_timer() {
        let timer = Timer::new("test-timer").unwrap();
        let (tx, rx) = unbounded();

        timer.schedule_after(Duration::ZERO, || panic!("job failure")).unwrap();
        timer.schedule_after(Duration::from_millis(10), move || tx.send(()).unwrap()).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok(), "Timer should survive a panicking job");
        timer.shutdown();
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let timer = Timer::new("test-timer").unwrap();
        timer.shutdown();
        timer.shutdown();
        assert!(matches!(timer.schedule_after(Duration::ZERO, || {}), Err(Error::Shutdown(_))));
    }

    #[test]
    fn test_zero_period_rejected() {
        let timer = Timer::new("test-timer").unwrap();
        assert!(timer.schedule_at_fixed_rate(Instant::now(), Duration::ZERO, || {}).is_err());
        timer.shutdown();
    }
}
