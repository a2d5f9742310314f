//! End-to-end detection scenarios driven through the public API

use chrono::{DateTime, TimeZone, Utc};
use huddle_sense::clock::ManualClock;
use huddle_sense::detector::{HysteresisStateMachine, Thresholds};
use huddle_sense::publisher::{JsonFilePublisher, MemoryPublisher};
use huddle_sense::types::{EndReason, Transition};
use huddle_sense::{
    replay_ndjson, DetectionState, DetectorConfig, HuddleMonitor, MetricsSnapshot,
    ScriptedSampler, StatusRead, StatusReader, Trend, STATUS_SCHEMA_VERSION,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicBool;
use tempfile::tempdir;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

/// Snapshot scoring exactly `score` (a multiple of 5) through audio fds alone
fn scoring(score: u32) -> MetricsSnapshot {
    assert_eq!(score % 5, 0);
    let mut snapshot = MetricsSnapshot::zeroed(start());
    snapshot.audio_fds = 3 + score / 5;
    snapshot
}

fn ndjson(scores: &[u32]) -> String {
    scores
        .iter()
        .map(|&s| serde_json::to_string(&scoring(s)).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn huddle_is_confirmed_then_ended_with_rebaseline() {
    let records = replay_ndjson(&ndjson(&[65, 60, 40]), DetectorConfig::default(), Some(10.0))
        .unwrap();

    let states: Vec<_> = records.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            DetectionState::PendingStart,
            DetectionState::InHuddle,
            DetectionState::Idle
        ]
    );

    assert!(!records[0].in_huddle);
    assert!(records[1].in_huddle);
    assert_eq!(records[1].peak_score, 65);
    assert_eq!(records[1].baseline, 10.0);

    assert!(!records[2].in_huddle);
    assert_eq!(records[2].baseline, 40.0);
    assert_eq!(records[2].peak_score, 0);
}

#[test]
fn huddle_ending_at_42_rebaselines_to_42() {
    // Snapshot scores are multiples of 5, so these are fed to the machine directly
    let mut machine = HysteresisStateMachine::with_baseline(Thresholds::default(), 10.0).unwrap();

    assert_eq!(
        machine.step(65, Trend::Flat, start()),
        Some(Transition::PendingStart)
    );
    assert_eq!(
        machine.step(60, Trend::Flat, start()),
        Some(Transition::Started { peak_score: 65 })
    );
    assert_eq!(machine.peak_score(), 65);
    assert_eq!(
        machine.step(42, Trend::Flat, start()),
        Some(Transition::Ended {
            reason: EndReason::PeakDrop,
            baseline: 42.0
        })
    );
    assert_eq!(machine.state(), DetectionState::Idle);
    assert_eq!(machine.baseline(), 42.0);
}

#[test]
fn slow_decline_ends_on_falling_trend() {
    let scores = [100, 100, 95, 95, 90, 90, 85, 85, 80];
    let sampler = ScriptedSampler::from_snapshots(scores.iter().map(|&s| scoring(s)));
    let mut monitor = HuddleMonitor::new(
        DetectorConfig::default(),
        sampler,
        MemoryPublisher::new(),
        ManualClock::new(start()),
    )
    .unwrap();
    monitor.calibrate_with(10.0).unwrap();

    let reports: Vec<_> = scores.iter().map(|_| monitor.run_cycle()).collect();

    assert_eq!(reports[1].transition, Some(Transition::Started { peak_score: 100 }));
    // The window fills on cycle 5; each later cycle is also falling
    for report in &reports[4..8] {
        assert_eq!(report.trend, Trend::Falling);
        assert_eq!(report.state, DetectionState::InHuddle);
        assert_eq!(report.transition, None);
    }
    assert_eq!(
        reports[8].transition,
        Some(Transition::Ended {
            reason: EndReason::FallingTrend,
            baseline: 80.0
        })
    );
    assert_eq!(reports[8].state, DetectionState::Idle);

    let records = replay_ndjson(&ndjson(&scores), DetectorConfig::default(), Some(10.0)).unwrap();
    assert!(records[7].in_huddle);
    assert!(!records[8].in_huddle);
    assert_eq!(records[8].baseline, 80.0);
}

#[test]
fn transient_spike_is_rejected() {
    let records =
        replay_ndjson(&ndjson(&[65, 30, 0]), DetectorConfig::default(), Some(10.0)).unwrap();

    assert_eq!(records[0].state, DetectionState::PendingStart);
    assert_eq!(records[1].state, DetectionState::Idle);
    assert!(records.iter().all(|r| !r.in_huddle));
    assert!(records.iter().all(|r| r.baseline == 10.0));
}

#[test]
fn low_scores_never_start_a_huddle() {
    // start threshold is max(10 + 25, 50) = 50
    let records = replay_ndjson(
        &ndjson(&[45, 45, 45, 45, 45, 45]),
        DetectorConfig::default(),
        Some(10.0),
    )
    .unwrap();
    assert!(records.iter().all(|r| r.state == DetectionState::Idle));
}

#[test]
fn end_condition_holds_for_every_score() {
    for score in 0..=90u32 {
        let mut machine =
            HysteresisStateMachine::with_baseline(Thresholds::default(), 10.0).unwrap();
        machine.step(65, Trend::Flat, start());
        assert_eq!(
            machine.step(65, Trend::Flat, start()),
            Some(Transition::Started { peak_score: 65 })
        );

        let transition = machine.step(score, Trend::Flat, start());
        let expected_end = f64::from(score) <= 0.70 * 65.0 || f64::from(score) <= 10.0 + 10.0;
        assert_eq!(
            matches!(transition, Some(Transition::Ended { .. })),
            expected_end,
            "score {score}"
        );
        if expected_end {
            assert_eq!(
                transition,
                Some(Transition::Ended {
                    reason: EndReason::PeakDrop,
                    baseline: f64::from(score)
                })
            );
            assert_eq!(machine.baseline(), f64::from(score));
            assert_eq!(machine.state(), DetectionState::Idle);
        } else {
            assert_eq!(machine.state(), DetectionState::InHuddle);
            assert_eq!(machine.peak_score(), score.max(65));
        }
    }
}

#[test]
fn peak_never_decreases_during_a_huddle() {
    let records = replay_ndjson(
        &ndjson(&[60, 60, 80, 70, 90, 75, 85, 70]),
        DetectorConfig::default(),
        Some(10.0),
    )
    .unwrap();

    let peaks: Vec<_> = records
        .iter()
        .filter(|r| r.in_huddle)
        .map(|r| r.peak_score)
        .collect();
    assert_eq!(peaks, vec![60, 80, 80, 90, 90, 90, 90]);
}

#[test]
fn replay_is_deterministic() {
    let input = ndjson(&[5, 10, 5, 70, 75, 80, 40, 10, 60, 65]);

    let first = replay_ndjson(&input, DetectorConfig::default(), None).unwrap();
    let second = replay_ndjson(&input, DetectorConfig::default(), None).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 10);
    assert!(first.iter().all(|r| r.schema_version == STATUS_SCHEMA_VERSION));
    assert_eq!(first[0].state, DetectionState::Calibrating);
}

#[test]
fn sampling_failure_is_published_as_degraded() {
    let input = format!(
        "{}\n{{\"error\": \"lsof denied\"}}\n{}",
        ndjson(&[0]),
        ndjson(&[0])
    );
    let records = replay_ndjson(&input, DetectorConfig::default(), Some(0.0)).unwrap();

    assert_eq!(records.len(), 3);
    assert!(!records[0].degraded);
    assert!(records[1].degraded);
    assert_eq!(records[1].score, 0);
    assert!(!records[2].degraded);
}

#[test]
fn client_reads_what_the_monitor_publishes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("huddle-status.json");

    let sampler = ScriptedSampler::from_snapshots([scoring(70), scoring(75), scoring(80)]);
    let mut monitor = HuddleMonitor::new(
        DetectorConfig::default(),
        sampler,
        JsonFilePublisher::new(path.clone()),
        ManualClock::new(start()),
    )
    .unwrap();

    assert!(matches!(
        StatusReader::read(&path),
        StatusRead::NotRunning { .. }
    ));

    monitor.calibrate_with(10.0).unwrap();
    let stop = AtomicBool::new(false);
    assert_eq!(monitor.run(&stop, Some(3)), 3);

    match StatusReader::read(&path) {
        StatusRead::Running(status) => {
            assert!(status.in_huddle);
            assert_eq!(status.score, 80);
            assert_eq!(status.peak_score, 80);
            assert_eq!(status.timestamp, start() + chrono::Duration::seconds(6));
        }
        other => panic!("expected a running status, got {other:?}"),
    }
    assert!(!dir.path().join("huddle-status.json.tmp").exists());
}

#[test]
fn memory_publisher_records_every_cycle() {
    let sampler = ScriptedSampler::from_snapshots((0..4).map(|_| scoring(0)));
    let mut monitor = HuddleMonitor::new(
        DetectorConfig::default(),
        sampler,
        MemoryPublisher::new(),
        ManualClock::new(start()),
    )
    .unwrap();
    monitor.calibrate_with(0.0).unwrap();

    let stop = AtomicBool::new(false);
    monitor.run(&stop, Some(4));
    assert_eq!(monitor.publisher().records().len(), 4);
    assert_eq!(monitor.cycles(), 4);
}
