//! Replay sampler
//!
//! Feeds a recorded, ordered sequence of snapshots (or simulated failures)
//! into the engine. Used for deterministic replays and tests.

use super::MetricsSampler;
use crate::error::HuddleError;
use crate::types::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One recorded sampler result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptedRecord {
    /// A sampling failure, written as `{"error": "..."}`
    Failure { error: String },
    Snapshot(MetricsSnapshot),
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSampler {
    records: VecDeque<ScriptedRecord>,
}

impl ScriptedSampler {
    pub fn new(records: impl IntoIterator<Item = ScriptedRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn from_snapshots(snapshots: impl IntoIterator<Item = MetricsSnapshot>) -> Self {
        Self::new(snapshots.into_iter().map(ScriptedRecord::Snapshot))
    }

    /// Parse NDJSON (one record per line, blank lines skipped)
    pub fn parse_ndjson(ndjson: &str) -> Result<Self, HuddleError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: ScriptedRecord = serde_json::from_str(trimmed).map_err(|e| {
                HuddleError::StatusDecode(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }
        Ok(Self::new(records))
    }

    /// Records not yet replayed
    pub fn remaining(&self) -> usize {
        self.records.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty()
    }

    /// Timestamp of the first snapshot still queued
    pub fn first_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.records.iter().find_map(|r| match r {
            ScriptedRecord::Snapshot(s) => Some(s.captured_at),
            ScriptedRecord::Failure { .. } => None,
        })
    }
}

impl MetricsSampler for ScriptedSampler {
    fn sample(&mut self) -> Result<MetricsSnapshot, HuddleError> {
        match self.records.pop_front() {
            Some(ScriptedRecord::Snapshot(snapshot)) => Ok(snapshot),
            Some(ScriptedRecord::Failure { error }) => Err(HuddleError::Sampling(error)),
            None => Err(HuddleError::Sampling("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_with_failures() {
        let ndjson = r#"
{"slackAssertions": 1, "capturedAt": "2024-05-01T09:00:00Z"}

{"error": "lsof denied"}
{"audioUnits": 2, "capturedAt": "2024-05-01T09:00:06Z"}
"#;
        let mut sampler = ScriptedSampler::parse_ndjson(ndjson).unwrap();
        assert_eq!(sampler.remaining(), 3);

        assert_eq!(sampler.sample().unwrap().slack_assertions, 1);
        assert!(matches!(sampler.sample(), Err(HuddleError::Sampling(msg)) if msg == "lsof denied"));
        assert_eq!(sampler.sample().unwrap().audio_units, 2);
        assert!(sampler.is_exhausted());
        assert!(sampler.sample().is_err());
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = ScriptedSampler::parse_ndjson("{\"capturedAt\": \"2024-05-01T09:00:00Z\"}\nnot json")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_first_timestamp_skips_failures() {
        let ndjson = "{\"error\": \"x\"}\n{\"capturedAt\": \"2024-05-01T09:00:03Z\"}";
        let sampler = ScriptedSampler::parse_ndjson(ndjson).unwrap();
        assert_eq!(
            sampler.first_timestamp().unwrap().to_rfc3339(),
            "2024-05-01T09:00:03+00:00"
        );
    }
}
