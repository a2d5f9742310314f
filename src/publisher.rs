//! Status publishing
//!
//! Encodes the current cycle into a `PublishedStatus` record and hands it to a
//! publisher. The file publisher writes to a temporary sibling and renames it
//! into place, so a concurrent reader never sees a partial record.

use crate::detector::HysteresisStateMachine;
use crate::error::HuddleError;
use crate::types::{
    DetectionState, MetricsSnapshot, PublishedStatus, Score, StatusMetrics, Trend,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Current status schema version
pub const STATUS_SCHEMA_VERSION: &str = "huddle.status.v1";

/// Sink for per-cycle status records
pub trait StatusPublisher {
    fn publish(&mut self, status: &PublishedStatus) -> Result<(), HuddleError>;
}

impl<P: StatusPublisher + ?Sized> StatusPublisher for Box<P> {
    fn publish(&mut self, status: &PublishedStatus) -> Result<(), HuddleError> {
        (**self).publish(status)
    }
}

/// Builds status records from engine state
pub struct StatusEncoder;

impl StatusEncoder {
    /// Encode the current cycle's results
    pub fn encode(
        machine: &HysteresisStateMachine,
        score: Score,
        trend: Trend,
        snapshot: &MetricsSnapshot,
        now: DateTime<Utc>,
        degraded: bool,
    ) -> PublishedStatus {
        let state = machine.state();
        PublishedStatus {
            schema_version: STATUS_SCHEMA_VERSION.to_string(),
            in_huddle: state == DetectionState::InHuddle,
            state,
            score,
            baseline: machine.baseline(),
            peak_score: machine.peak_score(),
            trend,
            timestamp: now,
            degraded,
            metrics: StatusMetrics::from(snapshot),
        }
    }

    /// Encode to pretty JSON
    pub fn to_json(status: &PublishedStatus) -> Result<String, HuddleError> {
        Ok(serde_json::to_string_pretty(status)?)
    }
}

/// Publishes to a well-known JSON file
#[derive(Debug, Clone)]
pub struct JsonFilePublisher {
    path: PathBuf,
}

impl JsonFilePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatusPublisher for JsonFilePublisher {
    fn publish(&mut self, status: &PublishedStatus) -> Result<(), HuddleError> {
        let json = StatusEncoder::to_json(status)?;

        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json)
            .map_err(|e| HuddleError::Publish(format!("{}: {e}", tmp_path.display())))?;

        // Readable by an unprivileged display client
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o644))
            {
                discard(&tmp_path);
                return Err(HuddleError::Publish(format!("{}: {e}", tmp_path.display())));
            }
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            discard(&tmp_path);
            return Err(HuddleError::Publish(format!("{}: {e}", self.path.display())));
        }
        Ok(())
    }
}

/// Best-effort removal of a temp file left by a failed publish
fn discard(tmp_path: &Path) {
    if let Err(e) = std::fs::remove_file(tmp_path) {
        warn!(path = %tmp_path.display(), error = %e, "failed to remove temp status file");
    }
}

/// Keeps every published record in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    records: Vec<PublishedStatus>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[PublishedStatus] {
        &self.records
    }

    pub fn last(&self) -> Option<&PublishedStatus> {
        self.records.last()
    }

    pub fn into_records(self) -> Vec<PublishedStatus> {
        self.records
    }
}

impl StatusPublisher for MemoryPublisher {
    fn publish(&mut self, status: &PublishedStatus) -> Result<(), HuddleError> {
        self.records.push(status.clone());
        Ok(())
    }
}

/// JSON schema of the published status record
pub fn status_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": STATUS_SCHEMA_VERSION,
        "description": "Huddle presence status, rewritten once per detection cycle",
        "type": "object",
        "additionalProperties": false,
        "required": [
            "schemaVersion", "inHuddle", "state", "score", "baseline",
            "peakScore", "trend", "timestamp", "degraded", "metrics"
        ],
        "properties": {
            "schemaVersion": { "type": "string", "const": STATUS_SCHEMA_VERSION },
            "inHuddle": { "type": "boolean" },
            "state": {
                "type": "string",
                "enum": ["calibrating", "idle", "pending_start", "in_huddle"]
            },
            "score": { "type": "integer", "minimum": 0 },
            "baseline": { "type": "number", "minimum": 0 },
            "peakScore": { "type": "integer", "minimum": 0 },
            "trend": { "type": "string", "enum": ["↑", "↓", "→"] },
            "timestamp": { "type": "string", "format": "date-time" },
            "degraded": { "type": "boolean" },
            "metrics": {
                "type": "object",
                "additionalProperties": false,
                "required": ["slackAssertions", "audioUnits", "audioFds", "powerAssertions"],
                "properties": {
                    "slackAssertions": { "type": "integer", "minimum": 0 },
                    "audioUnits": { "type": "integer", "minimum": 0 },
                    "audioFds": { "type": "integer", "minimum": 0 },
                    "powerAssertions": { "type": "integer", "minimum": 0 }
                }
            }
        }
    })
}
