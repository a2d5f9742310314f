//! Monitoring loop
//!
//! Orchestrates the per-cycle pipeline:
//! 1. MetricsSampler - capture raw counters (fallback snapshot on failure)
//! 2. ScoreCalculator - weight counters into a score
//! 3. TrendTracker - update the window and classify direction
//! 4. HysteresisStateMachine - apply debounced transitions
//! 5. StatusPublisher - publish the cycle's status record
//!
//! Cycles run strictly one after another; the loop is the only writer of
//! detector state, so no locking is involved.

use crate::baseline::BaselineCalibrator;
use crate::clock::{Clock, ManualClock};
use crate::config::{DetectorConfig, SamplingFallback};
use crate::detector::{HysteresisStateMachine, Thresholds};
use crate::error::HuddleError;
use crate::publisher::{MemoryPublisher, StatusEncoder, StatusPublisher};
use crate::sampler::{MetricsSampler, ScriptedSampler};
use crate::score::ScoreCalculator;
use crate::trend::TrendTracker;
use crate::types::{CycleReport, MetricsSnapshot, PublishedStatus, Score, Transition, Trend};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, trace, warn};

pub struct HuddleMonitor<S, P, C> {
    config: DetectorConfig,
    sampler: S,
    publisher: P,
    clock: C,
    machine: HysteresisStateMachine,
    trend: TrendTracker,
    last_snapshot: Option<MetricsSnapshot>,
    cycles: u64,
}

impl<S, P, C> HuddleMonitor<S, P, C>
where
    S: MetricsSampler,
    P: StatusPublisher,
    C: Clock,
{
    /// Create a monitor in `Calibrating`
    pub fn new(
        config: DetectorConfig,
        sampler: S,
        publisher: P,
        clock: C,
    ) -> Result<Self, HuddleError> {
        config.validate()?;
        let machine = HysteresisStateMachine::new(
            Thresholds::from(&config),
            BaselineCalibrator::new(config.calibration_samples, config.calibration_retry_limit),
        );
        let trend = TrendTracker::new(config.trend_window, config.trend_noise_margin);
        Ok(Self {
            config,
            sampler,
            publisher,
            clock,
            machine,
            trend,
            last_snapshot: None,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn machine(&self) -> &HysteresisStateMachine {
        &self.machine
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Completed monitoring cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Establish the initial baseline, publishing a record per attempt.
    ///
    /// Fails with `CalibrationFailed` when the retry budget is spent without
    /// a single valid sample; the detector then stays in `Calibrating`.
    /// `stop` is checked before each attempt and yields `Interrupted`.
    pub fn calibrate(&mut self, stop: &AtomicBool) -> Result<f64, HuddleError> {
        info!(
            samples = self.config.calibration_samples,
            interval_ms = self.config.calibration_interval_ms,
            "calibrating baseline; assuming no huddle is active"
        );
        loop {
            if stop.load(Ordering::SeqCst) {
                info!("calibration interrupted");
                return Err(HuddleError::Interrupted);
            }
            let now = self.clock.now();
            let (snapshot, sampled) = match self.sampler.sample() {
                Ok(snapshot) => {
                    self.last_snapshot = Some(snapshot.clone());
                    (snapshot, Ok(()))
                }
                Err(e) => (self.fallback_snapshot(now), Err(e)),
            };
            let degraded = sampled.is_err();
            let score = ScoreCalculator::compute(&snapshot, self.config.baseline_fds);

            let result = self.machine.observe_calibration(sampled.map(|()| score));
            self.publish(score, Trend::Flat, &snapshot, now, degraded);

            match result {
                Ok(Some(Transition::Calibrated { baseline })) => return Ok(baseline),
                Ok(_) => self.clock.sleep(self.config.calibration_interval()),
                Err(e) => {
                    error!(error = %e, "calibration failed");
                    return Err(e);
                }
            }
        }
    }

    /// Skip sampling-based calibration and start from a known baseline
    pub fn calibrate_with(&mut self, baseline: f64) -> Result<f64, HuddleError> {
        self.machine.complete_calibration(baseline)?;
        Ok(baseline)
    }

    /// Run one sample-score-trend-transition-publish cycle
    pub fn run_cycle(&mut self) -> CycleReport {
        let now = self.clock.now();
        let (snapshot, degraded) = self.take_sample(now);
        let score = ScoreCalculator::compute(&snapshot, self.config.baseline_fds);
        trace!(
            contributions = ?ScoreCalculator::breakdown(&snapshot, self.config.baseline_fds),
            "score breakdown"
        );
        let trend = self.trend.observe(score);
        let transition = self.machine.step(score, trend, now);
        let published = self.publish(score, trend, &snapshot, now, degraded);
        self.cycles += 1;

        debug!(
            cycle = self.cycles,
            score,
            trend = trend.as_symbol(),
            state = self.machine.state().as_str(),
            baseline = self.machine.baseline(),
            ?transition,
            "cycle complete"
        );

        CycleReport {
            state: self.machine.state(),
            score,
            trend,
            baseline: self.machine.baseline(),
            peak_score: self.machine.peak_score(),
            transition,
            degraded,
            published,
        }
    }

    /// Run cycles until `stop` is set or `max_cycles` have completed.
    ///
    /// The stop flag is checked between cycles, never mid-cycle. Returns the
    /// number of cycles run.
    pub fn run(&mut self, stop: &AtomicBool, max_cycles: Option<u64>) -> u64 {
        let mut executed = 0u64;
        loop {
            if stop.load(Ordering::SeqCst) || max_cycles.is_some_and(|max| executed >= max) {
                break;
            }
            self.run_cycle();
            executed += 1;

            if stop.load(Ordering::SeqCst) || max_cycles.is_some_and(|max| executed >= max) {
                break;
            }
            self.clock.sleep(self.config.interval());
        }
        info!(cycles = executed, "monitoring stopped");
        executed
    }

    fn take_sample(&mut self, now: DateTime<Utc>) -> (MetricsSnapshot, bool) {
        match self.sampler.sample() {
            Ok(snapshot) => {
                self.last_snapshot = Some(snapshot.clone());
                (snapshot, false)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(error = %e, fallback = ?self.config.sampling_fallback, "sampling failed");
                } else {
                    error!(error = %e, fallback = ?self.config.sampling_fallback, "sampling failed");
                }
                (self.fallback_snapshot(now), true)
            }
        }
    }

    fn fallback_snapshot(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        match (self.config.sampling_fallback, &self.last_snapshot) {
            (SamplingFallback::Previous, Some(previous)) => previous.clone(),
            _ => MetricsSnapshot::zeroed(now),
        }
    }

    fn publish(
        &mut self,
        score: Score,
        trend: Trend,
        snapshot: &MetricsSnapshot,
        now: DateTime<Utc>,
        degraded: bool,
    ) -> bool {
        let status = StatusEncoder::encode(&self.machine, score, trend, snapshot, now, degraded);
        match self.publisher.publish(&status) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "status publish failed; dropping this cycle's record");
                false
            }
        }
    }
}

/// Replay recorded snapshots (NDJSON) through a fresh engine.
///
/// Time is simulated from the first snapshot's timestamp, so identical input
/// always yields identical records. Without a `baseline`, the leading records
/// are consumed by calibration. Returns every published record in order.
pub fn replay_ndjson(
    ndjson: &str,
    config: DetectorConfig,
    baseline: Option<f64>,
) -> Result<Vec<PublishedStatus>, HuddleError> {
    let sampler = ScriptedSampler::parse_ndjson(ndjson)?;
    let start = sampler
        .first_timestamp()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let mut monitor = HuddleMonitor::new(
        config,
        sampler,
        MemoryPublisher::new(),
        ManualClock::new(start),
    )?;

    let stop = AtomicBool::new(false);
    match baseline {
        Some(baseline) => monitor.calibrate_with(baseline)?,
        None => monitor.calibrate(&stop)?,
    };

    let remaining = monitor.sampler().remaining() as u64;
    monitor.run(&stop, Some(remaining));
    Ok(monitor.publisher.into_records())
}
