//! Detector configuration
//!
//! All thresholds are configuration constants rather than computed values.
//! A config file is plain JSON; any field left out takes its default.

use crate::error::HuddleError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default sampling period between monitoring cycles
pub const DEFAULT_INTERVAL_MS: u64 = 3_000;

/// Default number of samples averaged into the initial baseline
pub const DEFAULT_CALIBRATION_SAMPLES: u32 = 3;

/// Default length of the trend window
pub const DEFAULT_TREND_WINDOW: usize = 5;

/// What to score when the sampler fails for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingFallback {
    /// All counters zero
    Neutral,
    /// Last successfully sampled snapshot (zero if none yet)
    Previous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Period between monitoring cycles
    pub interval_ms: u64,
    /// Valid samples required for the initial baseline
    pub calibration_samples: u32,
    /// Period between calibration samples
    pub calibration_interval_ms: u64,
    /// Extra attempts allowed when calibration samples fail
    pub calibration_retry_limit: u32,
    /// Audio file descriptors expected with no huddle
    pub baseline_fds: u32,
    /// Number of scores kept for trend classification
    pub trend_window: usize,
    /// Minimum oldest-to-newest change that counts as a trend
    pub trend_noise_margin: u32,
    /// Points above baseline needed to start
    pub start_margin: f64,
    /// Absolute score floor needed to start
    pub start_floor: f64,
    /// Consecutive qualifying cycles needed to confirm a huddle
    pub start_confirmations: u32,
    /// Fraction of peak at or below which a huddle ends
    pub end_peak_ratio: f64,
    /// Points above baseline at or below which a huddle ends
    pub end_baseline_margin: f64,
    /// Consecutive falling-trend cycles that end a huddle
    pub falling_cycles_to_end: u32,
    pub sampling_fallback: SamplingFallback,
    /// Upper bound for each sampler command
    pub command_timeout_ms: u64,
    /// Process whose handles and assertions are counted
    pub target_process: String,
    /// Where the status record is published
    pub status_path: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            calibration_samples: DEFAULT_CALIBRATION_SAMPLES,
            calibration_interval_ms: 2_000,
            calibration_retry_limit: 5,
            baseline_fds: 3,
            trend_window: DEFAULT_TREND_WINDOW,
            trend_noise_margin: 5,
            start_margin: 25.0,
            start_floor: 50.0,
            start_confirmations: 2,
            end_peak_ratio: 0.70,
            end_baseline_margin: 10.0,
            falling_cycles_to_end: DEFAULT_TREND_WINDOW as u32,
            sampling_fallback: SamplingFallback::Neutral,
            command_timeout_ms: 1_000,
            target_process: "Slack".to_string(),
            status_path: None,
        }
    }
}

impl DetectorConfig {
    /// Load a configuration file and validate it
    pub fn load(path: &Path) -> Result<Self, HuddleError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        Ok(config)
    }

    /// Parse configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, HuddleError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HuddleError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, HuddleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), HuddleError> {
        if self.interval_ms == 0 || self.calibration_interval_ms == 0 {
            return Err(HuddleError::InvalidConfig(
                "intervals must be greater than zero".to_string(),
            ));
        }
        if self.calibration_samples == 0 {
            return Err(HuddleError::InvalidConfig(
                "calibration_samples must be at least 1".to_string(),
            ));
        }
        if self.trend_window < 2 {
            return Err(HuddleError::InvalidConfig(
                "trend_window must hold at least 2 scores".to_string(),
            ));
        }
        if !(self.end_peak_ratio > 0.0 && self.end_peak_ratio <= 1.0) {
            return Err(HuddleError::InvalidConfig(format!(
                "end_peak_ratio must be in (0, 1], got {}",
                self.end_peak_ratio
            )));
        }
        if self.start_confirmations == 0 {
            return Err(HuddleError::InvalidConfig(
                "start_confirmations must be at least 1".to_string(),
            ));
        }
        if self.start_margin < 0.0 || self.start_floor < 0.0 || self.end_baseline_margin < 0.0 {
            return Err(HuddleError::InvalidConfig(
                "margins and floors must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn calibration_interval(&self) -> Duration {
        Duration::from_millis(self.calibration_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Configured status path, or the per-user default
    pub fn resolved_status_path(&self) -> PathBuf {
        self.status_path
            .clone()
            .unwrap_or_else(default_status_path)
    }
}

/// Per-user status file shared by the detector and display clients.
///
/// Uses the invoking user under sudo so an elevated detector and an
/// unprivileged client agree on the path.
pub fn default_status_path() -> PathBuf {
    let user = std::env::var("SUDO_USER")
        .ok()
        .filter(|u| !u.is_empty())
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| "unknown".to_string());
    PathBuf::from("/tmp").join(format!("huddle-status-{user}.json"))
}
