//! Surge CLI library
//!
//! This library exposes profile configuration, pipeline wiring and result types
//! for testing and reuse.

pub mod config;
pub mod output;
pub mod pipeline;
