//! Watermark hysteresis over the urgent-lane depth

use crate::{Error, Result};

/// A change of the `bulk_allowed` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BulkEnabled,
    BulkDisabled,
}

/// Decides whether bulk work may be admitted
///
/// Starts disabled. Bulk is enabled when the urgent depth is strictly below
/// `low` and strictly below the bulk depth; it is disabled again only when the
/// urgent depth exceeds `high`. Between the watermarks the flag holds.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    low: usize,
    high: usize,
    bulk_allowed: bool,
}

impl Hysteresis {
    pub fn new(low: usize, high: usize) -> Result<Self> {
        if low >= high {
            return Err(Error::config(format!(
                "low_watermark ({low}) must be < high_watermark ({high})"
            )));
        }
        Ok(Self { low, high, bulk_allowed: false })
    }

    /// Apply one observation of the lane depths; at most one transition per call
    pub fn update(&mut self, urgent_depth: usize, bulk_depth: usize) -> Option<Transition> {
        if !self.bulk_allowed && urgent_depth < self.low && urgent_depth < bulk_depth {
            self.bulk_allowed = true;
            Some(Transition::BulkEnabled)
        } else if self.bulk_allowed && urgent_depth > self.high {
            self.bulk_allowed = false;
            Some(Transition::BulkDisabled)
        } else {
            None
        }
    }

    pub fn bulk_allowed(&self) -> bool {
        self.bulk_allowed
    }

    pub fn low(&self) -> usize {
        self.low
    }

    pub fn high(&self) -> usize {
        self.high
    }
}
