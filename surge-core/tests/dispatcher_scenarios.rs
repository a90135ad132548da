//! Scenarios for the two-lane priority dispatcher
//!
//! The tick is driven by hand so every admission decision is observable. The
//! consumer blocks until the test releases it, which pins permit usage.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use surge_common::{Priority, WorkItem};
use surge_core::dispatcher::{PriorityDispatcher, TickReport, Transition};
use surge_core::{DispatcherConfig, TaskResult};

fn config(permits: usize, workers: usize) -> DispatcherConfig {
    DispatcherConfig {
        low_watermark: 5,
        high_watermark: 20,
        bulk_budget_per_tick: 10,
        tick_period: Duration::from_millis(10),
        concurrency_permits: permits,
        queue_capacity: 1_000,
        worker_pool_size: workers,
    }
}

struct Harness {
    dispatcher: PriorityDispatcher,
    seen: Receiver<WorkItem>,
    release: Sender<()>,
    transitions: Vec<Transition>,
}

impl Harness {
    fn new(permits: usize, workers: usize) -> Self {
        let (seen_tx, seen) = unbounded();
        let (release, release_rx) = unbounded::<()>();
        let consumer = move |item: WorkItem| -> TaskResult {
            seen_tx.send(item)?;
            release_rx.recv()?;
            Ok(())
        };
        let dispatcher = PriorityDispatcher::new(&config(permits, workers), consumer)
            .expect("Failed to create dispatcher");
        // Workers must be parked on receive before the first hand-off
        thread::sleep(Duration::from_millis(50));
        Self { dispatcher, seen, release, transitions: Vec::new() }
    }

    fn tick(&mut self) -> TickReport {
        let report = self.dispatcher.tick();
        if let Some(transition) = report.transition {
            self.transitions.push(transition);
        }
        report
    }

    /// Tick until something is admitted; returns the admitting tick's report
    fn tick_until_admitted(&mut self) -> TickReport {
        for _ in 0..500 {
            let report = self.tick();
            if report.urgent_admitted + report.bulk_admitted > 0 {
                return report;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("Nothing admitted within 500 ticks");
    }

    /// Let the running item finish and admit the next one
    fn release_and_admit(&mut self) -> WorkItem {
        self.release.send(()).unwrap();
        thread::sleep(Duration::from_millis(10));
        self.tick_until_admitted();
        self.seen.recv_timeout(Duration::from_secs(2)).expect("Admitted item never reached the consumer")
    }

    fn finish(self) {
        let handle = self.dispatcher.handle();
        drop(self.release);
        handle.shutdown();
    }
}

fn urgent(i: usize) -> WorkItem {
    WorkItem::new(Some(Priority::Urgent), format!("urgent-{i}"))
}

fn bulk(i: usize) -> WorkItem {
    WorkItem::new(Some(Priority::Bulk), format!("bulk-{i}"))
}

/// LOW 5 / HIGH 20: urgent backlog of 25 keeps bulk off, draining to 4 turns
/// it on, and a new surge past 20 turns it off again
#[test]
fn test_watermark_hysteresis_cycle() {
    let mut h = Harness::new(1, 1);
    let handle = h.dispatcher.handle();

    for i in 0..25 {
        handle.push_urgent(urgent(i)).unwrap();
    }
    for i in 0..10 {
        handle.push_bulk(bulk(i)).unwrap();
    }

    h.tick_until_admitted();
    h.seen.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(h.dispatcher.urgent_depth(), 24);
    assert!(!h.dispatcher.bulk_allowed(), "Bulk starts disabled");

    // Drain one urgent item at a time; bulk flips on when the depth drops below 5
    while h.dispatcher.urgent_depth() > 2 {
        let item = h.release_and_admit();
        assert_eq!(item.priority(), Some(Priority::Urgent));
        let depth = h.dispatcher.urgent_depth();
        assert_eq!(h.dispatcher.bulk_allowed(), depth < 5, "Wrong bulk flag at urgent depth {}", depth);
    }
    assert_eq!(h.transitions, vec![Transition::BulkEnabled]);
    assert_eq!(h.dispatcher.bulk_depth(), 10, "Bulk must wait while urgent items are queued");

    // New surge: flag holds inside the band and drops once depth exceeds 20
    for i in 25..48 {
        handle.push_urgent(urgent(i)).unwrap();
    }
    assert_eq!(h.dispatcher.urgent_depth(), 25);
    h.release_and_admit();
    assert_eq!(h.dispatcher.urgent_depth(), 24);
    assert!(!h.dispatcher.bulk_allowed());
    assert_eq!(h.transitions, vec![Transition::BulkEnabled, Transition::BulkDisabled]);
    assert_eq!(handle.stats().transitions, 2);
    assert_eq!(handle.stats().bulk_admitted, 0);

    h.finish();
}

/// Once an urgent item is queued, no bulk item is admitted ahead of it
#[test]
fn test_urgent_items_overtake_queued_bulk() {
    let mut h = Harness::new(1, 1);
    let handle = h.dispatcher.handle();

    for i in 0..6 {
        handle.push_bulk(bulk(i)).unwrap();
    }
    h.tick_until_admitted();
    let first = h.seen.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first.payload(), "bulk-0");
    assert!(h.dispatcher.bulk_allowed());

    for i in 0..3 {
        handle.push_urgent(urgent(i)).unwrap();
    }

    let order: Vec<String> = (0..5).map(|_| h.release_and_admit().payload().to_string()).collect();
    assert_eq!(order, vec!["urgent-0", "urgent-1", "urgent-2", "bulk-1", "bulk-2"]);

    h.finish();
}

/// A bulk item the pool cannot take goes back to the lane without loss
#[test]
fn test_rejected_bulk_is_requeued_not_lost() {
    // More permits than workers so the pool saturates first
    let mut h = Harness::new(4, 1);
    let handle = h.dispatcher.handle();

    for i in 0..5 {
        handle.push_bulk(bulk(i)).unwrap();
    }

    let report = h.tick_until_admitted();
    assert_eq!(report.bulk_admitted, 1);
    assert_eq!(report.requeued, 1, "The second submission hits a busy pool");
    assert_eq!(h.dispatcher.bulk_depth(), 4);
    assert_eq!(handle.permits_available(), 3, "A rejected item must not hold a permit");

    let mut payloads = HashSet::new();
    payloads.insert(h.seen.recv_timeout(Duration::from_secs(2)).unwrap().payload().to_string());
    for _ in 0..4 {
        let item = h.release_and_admit();
        assert!(payloads.insert(item.payload().to_string()), "{} delivered twice", item.payload());
    }
    assert_eq!(payloads.len(), 5);
    assert!(handle.stats().requeued >= 1);

    h.finish();
}

#[test]
fn test_urgent_drain_is_bounded_only_by_permits() {
    let mut h = Harness::new(3, 3);
    let handle = h.dispatcher.handle();
    for i in 0..10 {
        handle.push_urgent(urgent(i)).unwrap();
    }

    // Workers come up asynchronously; keep ticking until all permits are used
    for _ in 0..500 {
        h.tick();
        if handle.permits_available() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(handle.permits_available(), 0);
    assert_eq!(h.dispatcher.urgent_depth(), 7);
    assert_eq!(handle.stats().urgent_admitted, 3);

    h.finish();
}
