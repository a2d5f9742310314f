//! Hysteresis state machine
//!
//! Turns a noisy per-cycle score into a debounced huddle decision. Entry needs
//! consecutive qualifying cycles; exit happens on the first cycle meeting any
//! end condition, after which the baseline is reset to the exit score.

use crate::baseline::{BaselineCalibrator, CalibrationProgress};
use crate::config::DetectorConfig;
use crate::error::HuddleError;
use crate::types::{DetectionState, EndReason, HuddleSession, Score, Transition, Trend};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Thresholds governing entry and exit
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub start_margin: f64,
    pub start_floor: f64,
    pub start_confirmations: u32,
    pub end_peak_ratio: f64,
    pub end_baseline_margin: f64,
    /// Zero disables the falling-trend exit
    pub falling_cycles_to_end: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&DetectorConfig::default())
    }
}

impl From<&DetectorConfig> for Thresholds {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            start_margin: config.start_margin,
            start_floor: config.start_floor,
            start_confirmations: config.start_confirmations.max(1),
            end_peak_ratio: config.end_peak_ratio,
            end_baseline_margin: config.end_baseline_margin,
            falling_cycles_to_end: config.falling_cycles_to_end,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HysteresisStateMachine {
    thresholds: Thresholds,
    state: DetectionState,
    session: Option<HuddleSession>,
    calibrator: BaselineCalibrator,
}

impl HysteresisStateMachine {
    /// Create a machine in `Calibrating`
    pub fn new(thresholds: Thresholds, calibrator: BaselineCalibrator) -> Self {
        Self {
            thresholds,
            state: DetectionState::Calibrating,
            session: None,
            calibrator,
        }
    }

    /// Create a machine that is already `Idle` at a known baseline
    pub fn with_baseline(thresholds: Thresholds, baseline: f64) -> Result<Self, HuddleError> {
        let mut machine = Self::new(thresholds, BaselineCalibrator::new(1, 0));
        machine.complete_calibration(baseline)?;
        Ok(machine)
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn session(&self) -> Option<&HuddleSession> {
        self.session.as_ref()
    }

    /// Current baseline; zero before calibration completes
    pub fn baseline(&self) -> f64 {
        self.calibrator.baseline().unwrap_or(0.0)
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn in_huddle(&self) -> bool {
        self.state == DetectionState::InHuddle
    }

    /// Peak score of the confirmed huddle, or zero outside one
    pub fn peak_score(&self) -> Score {
        match (&self.session, self.state) {
            (Some(session), DetectionState::InHuddle) => session.peak_score,
            _ => 0,
        }
    }

    /// Score a cycle must reach to count towards a huddle start
    pub fn start_threshold(&self) -> f64 {
        (self.baseline() + self.thresholds.start_margin).max(self.thresholds.start_floor)
    }

    /// Feed one calibration attempt; moves to `Idle` when calibration completes
    pub fn observe_calibration(
        &mut self,
        sample: Result<Score, HuddleError>,
    ) -> Result<Option<Transition>, HuddleError> {
        if self.state != DetectionState::Calibrating {
            return Ok(None);
        }
        match self.calibrator.observe(sample)? {
            CalibrationProgress::Complete(baseline) => Ok(Some(self.enter_idle(baseline))),
            CalibrationProgress::Collecting { .. } => Ok(None),
        }
    }

    /// Finish calibration with a known baseline
    pub fn complete_calibration(&mut self, baseline: f64) -> Result<Transition, HuddleError> {
        let baseline = self.calibrator.set_baseline(baseline)?;
        Ok(self.enter_idle(baseline))
    }

    /// Advance the machine by one cycle
    pub fn step(&mut self, score: Score, trend: Trend, now: DateTime<Utc>) -> Option<Transition> {
        match self.state {
            DetectionState::Calibrating => None,
            DetectionState::Idle => self.step_idle(score, now),
            DetectionState::PendingStart => self.step_pending(score, now),
            DetectionState::InHuddle => self.step_in_huddle(score, trend),
        }
    }

    fn enter_idle(&mut self, baseline: f64) -> Transition {
        self.state = DetectionState::Idle;
        self.session = None;
        info!(
            baseline,
            start_threshold = self.start_threshold(),
            "calibration complete"
        );
        Transition::Calibrated { baseline }
    }

    fn qualifies(&self, score: Score) -> bool {
        f64::from(score) >= self.start_threshold()
    }

    fn step_idle(&mut self, score: Score, now: DateTime<Utc>) -> Option<Transition> {
        if !self.qualifies(score) {
            return None;
        }

        let session = HuddleSession::new(now, score);
        if session.confirmation_count >= self.thresholds.start_confirmations {
            return Some(self.confirm(session));
        }

        debug!(score, session = %session.id, "huddle start pending confirmation");
        self.session = Some(session);
        self.state = DetectionState::PendingStart;
        Some(Transition::PendingStart)
    }

    fn step_pending(&mut self, score: Score, now: DateTime<Utc>) -> Option<Transition> {
        if !self.qualifies(score) {
            if let Some(session) = self.session.take() {
                debug!(score, session = %session.id, "transient spike rejected");
            }
            self.state = DetectionState::Idle;
            return Some(Transition::Rejected);
        }

        let Some(mut session) = self.session.take() else {
            // No candidate to confirm; this cycle opens a new one
            return self.step_idle(score, now);
        };
        session.confirmation_count += 1;
        session.peak_score = session.peak_score.max(score);

        if session.confirmation_count >= self.thresholds.start_confirmations {
            return Some(self.confirm(session));
        }

        self.session = Some(session);
        None
    }

    fn confirm(&mut self, session: HuddleSession) -> Transition {
        let peak_score = session.peak_score;
        info!(
            session = %session.id,
            peak_score,
            baseline = self.baseline(),
            "huddle started"
        );
        self.session = Some(session);
        self.state = DetectionState::InHuddle;
        Transition::Started { peak_score }
    }

    fn step_in_huddle(&mut self, score: Score, trend: Trend) -> Option<Transition> {
        let baseline = self.baseline();
        let thresholds = &self.thresholds;
        let session = self.session.as_mut()?;

        if trend == Trend::Falling {
            session.falling_cycles += 1;
        } else {
            session.falling_cycles = 0;
        }

        let score_f = f64::from(score);
        let reason = if score_f <= thresholds.end_peak_ratio * f64::from(session.peak_score) {
            Some(EndReason::PeakDrop)
        } else if score_f <= baseline + thresholds.end_baseline_margin {
            Some(EndReason::ReturnToBaseline)
        } else if thresholds.falling_cycles_to_end > 0
            && session.falling_cycles >= thresholds.falling_cycles_to_end
        {
            Some(EndReason::FallingTrend)
        } else {
            None
        };

        let Some(reason) = reason else {
            session.peak_score = session.peak_score.max(score);
            return None;
        };

        let peak_score = session.peak_score;
        let id = session.id;
        let baseline = self.calibrator.rebaseline(score);
        self.session = None;
        self.state = DetectionState::Idle;
        info!(
            session = %id,
            score,
            peak_score,
            ?reason,
            new_baseline = baseline,
            "huddle ended"
        );
        Some(Transition::Ended { reason, baseline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(baseline: f64) -> HysteresisStateMachine {
        HysteresisStateMachine::with_baseline(Thresholds::default(), baseline).unwrap()
    }

    fn step(m: &mut HysteresisStateMachine, score: Score) -> Option<Transition> {
        m.step(score, Trend::Flat, Utc::now())
    }

    #[test]
    fn test_starts_calibrating() {
        let m = HysteresisStateMachine::new(Thresholds::default(), BaselineCalibrator::new(3, 1));
        assert_eq!(m.state(), DetectionState::Calibrating);
        assert_eq!(m.baseline(), 0.0);
    }

    #[test]
    fn test_step_ignored_while_calibrating() {
        let mut m =
            HysteresisStateMachine::new(Thresholds::default(), BaselineCalibrator::new(3, 1));
        assert_eq!(step(&mut m, 200), None);
        assert_eq!(m.state(), DetectionState::Calibrating);
    }

    #[test]
    fn test_calibration_moves_to_idle() {
        let mut m =
            HysteresisStateMachine::new(Thresholds::default(), BaselineCalibrator::new(2, 0));
        assert_eq!(m.observe_calibration(Ok(10)).unwrap(), None);
        assert_eq!(
            m.observe_calibration(Ok(20)).unwrap(),
            Some(Transition::Calibrated { baseline: 15.0 })
        );
        assert_eq!(m.state(), DetectionState::Idle);
    }

    #[test]
    fn test_start_threshold_uses_floor_and_margin() {
        assert_eq!(machine(10.0).start_threshold(), 50.0);
        assert_eq!(machine(40.0).start_threshold(), 65.0);
    }

    #[test]
    fn test_single_qualifying_cycle_is_pending() {
        let mut m = machine(10.0);
        assert_eq!(step(&mut m, 49), None);
        assert_eq!(m.state(), DetectionState::Idle);
        assert_eq!(step(&mut m, 50), Some(Transition::PendingStart));
        assert_eq!(m.state(), DetectionState::PendingStart);
        assert_eq!(m.session().unwrap().confirmation_count, 1);
        assert!(!m.in_huddle());
        assert_eq!(m.peak_score(), 0);
    }

    #[test]
    fn test_second_confirmation_enters_huddle_with_max_peak() {
        let mut m = machine(10.0);
        step(&mut m, 65);
        assert_eq!(
            step(&mut m, 60),
            Some(Transition::Started { peak_score: 65 })
        );
        assert!(m.in_huddle());
        assert_eq!(m.peak_score(), 65);
    }

    #[test]
    fn test_session_times_come_from_cycle_timestamps() {
        use chrono::TimeZone;

        let first = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let second = first + chrono::Duration::seconds(3);
        let mut m = machine(10.0);

        m.step(65, Trend::Flat, first);
        assert_eq!(m.session().unwrap().start_time, first);
        assert_eq!(
            m.step(60, Trend::Flat, second),
            Some(Transition::Started { peak_score: 65 })
        );
        let session = m.session().unwrap();
        assert_eq!(session.start_time, first);
        assert_eq!(session.confirmation_count, 2);
    }

    #[test]
    fn test_rejected_spike_returns_to_idle() {
        let mut m = machine(10.0);
        step(&mut m, 55);
        assert_eq!(step(&mut m, 20), Some(Transition::Rejected));
        assert_eq!(m.state(), DetectionState::Idle);
        assert!(m.session().is_none());
        assert_eq!(m.baseline(), 10.0);

        assert_eq!(step(&mut m, 55), Some(Transition::PendingStart));
        assert_eq!(m.session().unwrap().confirmation_count, 1);
    }

    #[test]
    fn test_peak_is_non_decreasing() {
        let mut m = machine(10.0);
        step(&mut m, 60);
        step(&mut m, 60);
        let mut last_peak = m.peak_score();
        for score in [70, 90, 80, 75, 100, 95] {
            assert_eq!(step(&mut m, score), None);
            assert!(m.peak_score() >= last_peak);
            last_peak = m.peak_score();
        }
        assert_eq!(last_peak, 100);
    }

    #[test]
    fn test_peak_relative_drop_ends_huddle() {
        let mut m = machine(10.0);
        step(&mut m, 65);
        step(&mut m, 60);
        assert_eq!(step(&mut m, 46), None);
        assert_eq!(
            step(&mut m, 45),
            Some(Transition::Ended {
                reason: EndReason::PeakDrop,
                baseline: 45.0
            })
        );
        assert_eq!(m.state(), DetectionState::Idle);
        assert_eq!(m.baseline(), 45.0);
    }

    #[test]
    fn test_return_to_baseline_ends_huddle() {
        let thresholds = Thresholds {
            end_peak_ratio: 0.1,
            ..Thresholds::default()
        };
        let mut m = HysteresisStateMachine::with_baseline(thresholds, 10.0).unwrap();
        step(&mut m, 65);
        step(&mut m, 65);
        assert_eq!(step(&mut m, 21), None);
        assert_eq!(
            step(&mut m, 20),
            Some(Transition::Ended {
                reason: EndReason::ReturnToBaseline,
                baseline: 20.0
            })
        );
    }

    #[test]
    fn test_peak_drop_checked_before_baseline() {
        let mut m = machine(10.0);
        step(&mut m, 65);
        step(&mut m, 65);
        assert_eq!(
            step(&mut m, 15),
            Some(Transition::Ended {
                reason: EndReason::PeakDrop,
                baseline: 15.0
            })
        );
    }

    #[test]
    fn test_sustained_falling_trend_ends_huddle() {
        let thresholds = Thresholds {
            falling_cycles_to_end: 3,
            ..Thresholds::default()
        };
        let mut m = HysteresisStateMachine::with_baseline(thresholds, 10.0).unwrap();
        step(&mut m, 100);
        step(&mut m, 100);
        let now = Utc::now();
        assert_eq!(m.step(95, Trend::Falling, now), None);
        assert_eq!(m.step(90, Trend::Flat, now), None);
        assert_eq!(m.step(88, Trend::Falling, now), None);
        assert_eq!(m.step(86, Trend::Falling, now), None);
        assert_eq!(
            m.step(85, Trend::Falling, now),
            Some(Transition::Ended {
                reason: EndReason::FallingTrend,
                baseline: 85.0
            })
        );
    }

    #[test]
    fn test_rebaseline_raises_next_start_threshold() {
        let mut m = machine(10.0);
        step(&mut m, 100);
        step(&mut m, 100);
        step(&mut m, 60);
        assert_eq!(m.baseline(), 60.0);
        assert_eq!(m.start_threshold(), 85.0);
        assert_eq!(step(&mut m, 80), None);
        assert_eq!(step(&mut m, 85), Some(Transition::PendingStart));
    }

    #[test]
    fn test_single_confirmation_config_starts_immediately() {
        let thresholds = Thresholds {
            start_confirmations: 1,
            ..Thresholds::default()
        };
        let mut m = HysteresisStateMachine::with_baseline(thresholds, 0.0).unwrap();
        assert_eq!(
            step(&mut m, 50),
            Some(Transition::Started { peak_score: 50 })
        );
    }

    #[test]
    fn test_three_confirmations_stay_pending() {
        let thresholds = Thresholds {
            start_confirmations: 3,
            ..Thresholds::default()
        };
        let mut m = HysteresisStateMachine::with_baseline(thresholds, 0.0).unwrap();
        step(&mut m, 55);
        assert_eq!(step(&mut m, 70), None);
        assert_eq!(m.state(), DetectionState::PendingStart);
        assert_eq!(
            step(&mut m, 60),
            Some(Transition::Started { peak_score: 70 })
        );
    }
}
