//! Statistics collection and periodic reporting

pub mod metrics;
pub mod reporter;

pub use metrics::{Lane, LaneSnapshot, MetricsSnapshot, PipelineMetrics};
pub use reporter::MetricsReporter;
