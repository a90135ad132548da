//! Execution runtime
//!
//! Uses native OS threads (std::thread): one timer thread makes every admission
//! decision, fixed-size worker pools execute the admitted work.

pub mod permits;
pub mod pool;
pub mod queue;
pub mod timer;

pub use permits::{PermitGuard, Permits};
pub use pool::{PoolStats, WorkerPool};
pub use queue::BoundedQueue;
pub use timer::{Timer, TimerHandle};
