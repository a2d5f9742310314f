//! Consumer-side status reader
//!
//! A display client must tell "engine not running" apart from "running and
//! not in a huddle". Anything other than a well-formed record of the current
//! schema version is reported as not running.

use crate::error::HuddleError;
use crate::publisher::STATUS_SCHEMA_VERSION;
use crate::types::PublishedStatus;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Outcome of reading the status file
#[derive(Debug, Clone, PartialEq)]
pub enum StatusRead {
    NotRunning { reason: String },
    Running(PublishedStatus),
}

impl StatusRead {
    pub fn status(&self) -> Option<&PublishedStatus> {
        match self {
            StatusRead::Running(status) => Some(status),
            StatusRead::NotRunning { .. } => None,
        }
    }

    /// True when not running, or when the last record is older than `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self {
            StatusRead::Running(status) => status.age(now) > max_age,
            StatusRead::NotRunning { .. } => true,
        }
    }
}

pub struct StatusReader;

impl StatusReader {
    /// Read and strictly decode the status file
    pub fn read(path: &Path) -> StatusRead {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                return StatusRead::NotRunning {
                    reason: format!("cannot read {}: {e}", path.display()),
                }
            }
        };
        match Self::decode(&contents) {
            Ok(status) => StatusRead::Running(status),
            Err(e) => StatusRead::NotRunning {
                reason: e.to_string(),
            },
        }
    }

    /// Decode a status record, rejecting unknown fields and other versions
    pub fn decode(json: &str) -> Result<PublishedStatus, HuddleError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| HuddleError::StatusDecode(e.to_string()))?;

        let found = value
            .get("schemaVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("missing");
        if found != STATUS_SCHEMA_VERSION {
            return Err(HuddleError::SchemaMismatch {
                expected: STATUS_SCHEMA_VERSION.to_string(),
                found: found.to_string(),
            });
        }

        serde_json::from_value(value).map_err(|e| HuddleError::StatusDecode(e.to_string()))
    }
}
