//! Metrics samplers
//!
//! A sampler supplies one snapshot of raw counters per cycle. The engine only
//! depends on the `MetricsSampler` trait; how counters are obtained is up to
//! each implementation.

mod command;
mod scripted;

pub use command::{CommandSampler, LsofCounts, PmsetCounts};
pub use scripted::{ScriptedRecord, ScriptedSampler};

use crate::error::HuddleError;
use crate::types::MetricsSnapshot;

/// Trait for metrics sources
pub trait MetricsSampler {
    /// Capture the counters for the current instant
    fn sample(&mut self) -> Result<MetricsSnapshot, HuddleError>;
}

impl<S: MetricsSampler + ?Sized> MetricsSampler for Box<S> {
    fn sample(&mut self) -> Result<MetricsSnapshot, HuddleError> {
        (**self).sample()
    }
}
