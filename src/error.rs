//! Error types for Huddle Sense

use thiserror::Error;

/// Errors that can occur while sampling, detecting, or publishing
#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("Sampling failed: {0}")]
    Sampling(String),

    #[error("Sampling command timed out: {command}")]
    SamplingTimeout { command: String },

    #[error("Calibration failed: {valid} valid samples after {attempts} attempts")]
    CalibrationFailed { attempts: u32, valid: u32 },

    #[error("Interrupted before calibration completed")]
    Interrupted,

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Status decode error: {0}")]
    StatusDecode(String),

    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
}

impl HuddleError {
    /// Whether the error only affects the current cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HuddleError::Sampling(_)
                | HuddleError::SamplingTimeout { .. }
                | HuddleError::Publish(_)
                | HuddleError::Io(_)
        )
    }
}
