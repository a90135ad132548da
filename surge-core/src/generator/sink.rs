//! Destination for emitted work items

use crate::TaskResult;
use std::panic::{catch_unwind, AssertUnwindSafe};
use surge_common::WorkItem;
use tracing::error;

/// Receives every item the generator emits, exactly once per item
///
/// Returning `Err` (or panicking) is logged and counted; it never stops the
/// generator.
pub trait TaskSink: Send + Sync + 'static {
    fn emit(&self, item: WorkItem) -> TaskResult;
}

impl<F> TaskSink for F
where
    F: Fn(WorkItem) -> TaskResult + Send + Sync + 'static,
{
    fn emit(&self, item: WorkItem) -> TaskResult {
        self(item)
    }
}

/// Deliver `item`, catching errors and panics; returns whether delivery succeeded
pub(crate) fn deliver(sink: &dyn TaskSink, item: WorkItem) -> bool {
    let created_at = item.created_at_millis();
    match catch_unwind(AssertUnwindSafe(|| sink.emit(item))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Sink failed for item created at {}: {:#}", created_at, e);
            false
        }
        Err(_) => {
            error!("Sink panicked for item created at {}", created_at);
            false
        }
    }
}
