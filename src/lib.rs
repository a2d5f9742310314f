//! Huddle Sense - background engine that infers live audio/video huddles
//!
//! Huddle Sense samples indirect OS signals (power assertions, audio handles,
//! audio engine clients) and turns them into a debounced presence decision
//! through a deterministic pipeline: sampling → scoring → trend tracking →
//! hysteresis state machine → status publishing.
//!
//! ## Modules
//!
//! - **Engine**: `score`, `trend`, `baseline`, `detector`
//! - **Plumbing**: `sampler`, `clock`, `monitor`, `publisher`, `reader`

pub mod baseline;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
#[cfg(feature = "cli")]
pub mod logging;
pub mod monitor;
pub mod publisher;
pub mod reader;
pub mod sampler;
pub mod score;
pub mod trend;
pub mod types;

pub use config::DetectorConfig;
pub use detector::{HysteresisStateMachine, Thresholds};
pub use error::HuddleError;
pub use monitor::{replay_ndjson, HuddleMonitor};
pub use publisher::{JsonFilePublisher, StatusPublisher, STATUS_SCHEMA_VERSION};
pub use reader::{StatusRead, StatusReader};
pub use sampler::{CommandSampler, MetricsSampler, ScriptedSampler};
pub use types::{DetectionState, MetricsSnapshot, PublishedStatus, Trend};

/// Crate version
pub const HUDDLE_SENSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in diagnostics
pub const PRODUCER_NAME: &str = "huddle-sense";
