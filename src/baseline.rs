//! Baseline management
//!
//! The baseline is the expected score when no huddle is active. It is set
//! once by averaging calibration samples at startup, then replaced by the
//! score observed whenever a huddle ends.

use crate::error::HuddleError;
use crate::types::Score;
use tracing::{debug, warn};

/// Progress of an ongoing calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationProgress {
    /// More samples are needed
    Collecting { valid: u32, attempts: u32 },
    /// Calibration finished with this baseline
    Complete(f64),
}

/// Calibrator owning the baseline value
#[derive(Debug, Clone)]
pub struct BaselineCalibrator {
    /// Scores collected during calibration
    samples: Vec<Score>,
    /// Valid samples required
    target_samples: u32,
    /// Extra attempts allowed for failed samples
    retry_limit: u32,
    /// Attempts made so far, valid or not
    attempts: u32,
    baseline: Option<f64>,
}

impl BaselineCalibrator {
    pub fn new(target_samples: u32, retry_limit: u32) -> Self {
        let target_samples = target_samples.max(1);
        Self {
            samples: Vec::with_capacity(target_samples as usize),
            target_samples,
            retry_limit,
            attempts: 0,
            baseline: None,
        }
    }

    /// Current baseline, if calibrated
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// Upper bound on calibration attempts
    pub fn max_attempts(&self) -> u32 {
        self.target_samples.saturating_add(self.retry_limit)
    }

    /// Feed one calibration attempt.
    ///
    /// Failed samples consume an attempt without contributing. Once the
    /// attempt budget is spent, calibration completes with the mean of
    /// whatever valid samples exist, or fails if there are none.
    pub fn observe(
        &mut self,
        sample: Result<Score, HuddleError>,
    ) -> Result<CalibrationProgress, HuddleError> {
        if let Some(baseline) = self.baseline {
            return Ok(CalibrationProgress::Complete(baseline));
        }

        self.attempts += 1;
        match sample {
            Ok(score) => {
                debug!(score, attempt = self.attempts, "calibration sample");
                self.samples.push(score);
            }
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "calibration sample failed");
            }
        }

        let valid = self.samples.len() as u32;
        if valid >= self.target_samples {
            return Ok(CalibrationProgress::Complete(self.finish()));
        }

        if self.attempts >= self.max_attempts() {
            if valid == 0 {
                return Err(HuddleError::CalibrationFailed {
                    attempts: self.attempts,
                    valid,
                });
            }
            warn!(
                valid,
                target = self.target_samples,
                "calibration retry budget spent; using partial sample set"
            );
            return Ok(CalibrationProgress::Complete(self.finish()));
        }

        Ok(CalibrationProgress::Collecting {
            valid,
            attempts: self.attempts,
        })
    }

    /// Run calibration over a stream of sample attempts
    pub fn calibrate<I>(&mut self, samples: I) -> Result<f64, HuddleError>
    where
        I: IntoIterator<Item = Result<Score, HuddleError>>,
    {
        for sample in samples {
            if let CalibrationProgress::Complete(baseline) = self.observe(sample)? {
                return Ok(baseline);
            }
        }
        Err(HuddleError::CalibrationFailed {
            attempts: self.attempts,
            valid: self.samples.len() as u32,
        })
    }

    /// Replace the baseline with the score observed when a huddle ended
    pub fn rebaseline(&mut self, score: Score) -> f64 {
        let baseline = f64::from(score);
        self.baseline = Some(baseline);
        baseline
    }

    /// Set a known baseline without sampling
    pub fn set_baseline(&mut self, baseline: f64) -> Result<f64, HuddleError> {
        if !baseline.is_finite() || baseline < 0.0 {
            return Err(HuddleError::InvalidConfig(format!(
                "baseline must be a non-negative number, got {baseline}"
            )));
        }
        self.baseline = Some(baseline);
        Ok(baseline)
    }

    fn finish(&mut self) -> f64 {
        let baseline = Self::average(&self.samples);
        self.baseline = Some(baseline);
        baseline
    }

    fn average(samples: &[Score]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| f64::from(s)).sum();
        sum / samples.len() as f64
    }
}
