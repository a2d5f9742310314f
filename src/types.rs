//! Core types for the Huddle Sense engine
//!
//! This module defines the data structures that flow through each cycle:
//! raw metrics snapshots, trend and state classifications, the transient huddle
//! session, and the published status record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Non-negative huddle score derived from one snapshot
pub type Score = u32;

/// Raw counters captured by a sampler for a single instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Audio-related power-management assertions
    #[serde(default)]
    pub power_assertions: u32,
    /// Power assertions held by the target application
    #[serde(default)]
    pub slack_assertions: u32,
    /// Loaded audio units (AudioToolbox handles)
    #[serde(default)]
    pub audio_units: u32,
    /// HAL plugin handles
    #[serde(default)]
    pub ha_plugins: u32,
    /// Audio-related file descriptors
    #[serde(default)]
    pub audio_fds: u32,
    /// IO-registry audio engine clients
    #[serde(default)]
    pub io_clients: u32,
    /// Connections to the CoreAudio daemon
    #[serde(default)]
    pub core_audio_connections: u32,
    /// When the counters were captured
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// All-zero snapshot, used when sampling fails
    pub fn zeroed(captured_at: DateTime<Utc>) -> Self {
        Self {
            power_assertions: 0,
            slack_assertions: 0,
            audio_units: 0,
            ha_plugins: 0,
            audio_fds: 0,
            io_clients: 0,
            core_audio_connections: 0,
            captured_at,
        }
    }
}

/// Short-term direction of the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    #[serde(rename = "↑")]
    Rising,
    #[serde(rename = "↓")]
    Falling,
    #[serde(rename = "→")]
    Flat,
}

impl Trend {
    pub fn as_symbol(&self) -> &'static str {
        match self {
            Trend::Rising => "↑",
            Trend::Falling => "↓",
            Trend::Flat => "→",
        }
    }
}

/// Detection state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    Calibrating,
    Idle,
    PendingStart,
    InHuddle,
}

impl DetectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Calibrating => "calibrating",
            DetectionState::Idle => "idle",
            DetectionState::PendingStart => "pending_start",
            DetectionState::InHuddle => "in_huddle",
        }
    }
}

/// A candidate or confirmed huddle
#[derive(Debug, Clone, PartialEq)]
pub struct HuddleSession {
    /// Identifier used to correlate log lines for one huddle
    pub id: Uuid,
    /// Time of the first qualifying cycle
    pub start_time: DateTime<Utc>,
    /// Highest score seen; non-decreasing while in a huddle
    pub peak_score: Score,
    /// Consecutive qualifying cycles while pending
    pub confirmation_count: u32,
    /// Consecutive cycles with a falling trend while in a huddle
    pub falling_cycles: u32,
}

impl HuddleSession {
    pub fn new(start_time: DateTime<Utc>, first_score: Score) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time,
            peak_score: first_score,
            confirmation_count: 1,
            falling_cycles: 0,
        }
    }
}

/// Why a huddle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Score fell to the configured fraction of the peak
    PeakDrop,
    /// Score returned close to the baseline
    ReturnToBaseline,
    /// Trend stayed falling for the configured number of cycles
    FallingTrend,
}

/// State change produced by a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transition {
    Calibrated { baseline: f64 },
    PendingStart,
    Rejected,
    Started { peak_score: Score },
    Ended { reason: EndReason, baseline: f64 },
}

/// Metrics breakdown carried in the published status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatusMetrics {
    pub slack_assertions: u32,
    pub audio_units: u32,
    pub audio_fds: u32,
    pub power_assertions: u32,
}

impl From<&MetricsSnapshot> for StatusMetrics {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            slack_assertions: snapshot.slack_assertions,
            audio_units: snapshot.audio_units,
            audio_fds: snapshot.audio_fds,
            power_assertions: snapshot.power_assertions,
        }
    }
}

/// Externally visible status record, written once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublishedStatus {
    pub schema_version: String,
    pub in_huddle: bool,
    pub state: DetectionState,
    pub score: Score,
    pub baseline: f64,
    pub peak_score: Score,
    pub trend: Trend,
    pub timestamp: DateTime<Utc>,
    /// True when this cycle ran on a fallback snapshot
    pub degraded: bool,
    pub metrics: StatusMetrics,
}

impl PublishedStatus {
    /// Time elapsed since the record was written
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub state: DetectionState,
    pub score: Score,
    pub trend: Trend,
    pub baseline: f64,
    pub peak_score: Score,
    pub transition: Option<Transition>,
    pub degraded: bool,
    pub published: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trend_serializes_as_arrow() {
        assert_eq!(serde_json::to_string(&Trend::Rising).unwrap(), "\"↑\"");
        assert_eq!(serde_json::to_string(&Trend::Falling).unwrap(), "\"↓\"");
        assert_eq!(serde_json::to_string(&Trend::Flat).unwrap(), "\"→\"");
        assert_eq!(Trend::Flat.as_symbol(), "→");
    }

    #[test]
    fn test_snapshot_missing_counters_default_to_zero() {
        let json = r#"{"slackAssertions": 2, "capturedAt": "2024-05-01T09:00:00Z"}"#;
        let snapshot: MetricsSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.slack_assertions, 2);
        assert_eq!(snapshot.audio_units, 0);
        assert_eq!(
            snapshot.captured_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_status_metrics_from_snapshot() {
        let mut snapshot = MetricsSnapshot::zeroed(Utc::now());
        snapshot.audio_fds = 7;
        snapshot.io_clients = 4;
        let metrics = StatusMetrics::from(&snapshot);
        assert_eq!(metrics.audio_fds, 7);
        assert_eq!(metrics.power_assertions, 0);
    }

    #[test]
    fn test_new_session_counts_first_confirmation() {
        let session = HuddleSession::new(Utc::now(), 55);
        assert_eq!(session.confirmation_count, 1);
        assert_eq!(session.peak_score, 55);
        assert_eq!(session.falling_cycles, 0);
    }
}
