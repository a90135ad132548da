//! Common types for surge
//!
//! This crate provides leaf types shared by the surge crates:
//! - `distributions`: random samplers for arrival timing and batch sizes
//! - `work_item`: the work item exchanged between producers and consumers

pub mod distributions;
pub mod work_item;

pub use distributions::{BatchSizeSampler, ExponentialDistribution, FixedBatchSize, GeometricBatchSize};

pub use work_item::{now_millis, Priority, WorkItem};
