//! Huddle scoring
//!
//! Maps a metrics snapshot to a single weighted score. Each indicator is
//! capped on its own before summation so no single counter dominates; the
//! total itself is unbounded.

use crate::types::{MetricsSnapshot, Score};

const POWER_ASSERTION_POINTS: u32 = 25;
const SLACK_ASSERTION_POINTS: u32 = 20;
const SLACK_ASSERTION_CAP: u32 = 60;
const AUDIO_UNIT_POINTS: u32 = 15;
const AUDIO_UNIT_CAP: u32 = 30;
const HAL_PLUGIN_POINTS: u32 = 10;
const AUDIO_FD_POINTS: u32 = 5;
const IO_CLIENT_POINTS: u32 = 10;
const CORE_AUDIO_POINTS: u32 = 10;

/// Scored indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    PowerAssertions,
    SlackAssertions,
    AudioUnits,
    HalPlugins,
    AudioFds,
    IoClients,
    CoreAudioConnections,
}

impl Indicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::PowerAssertions => "power_assertions",
            Indicator::SlackAssertions => "slack_assertions",
            Indicator::AudioUnits => "audio_units",
            Indicator::HalPlugins => "hal_plugins",
            Indicator::AudioFds => "audio_fds",
            Indicator::IoClients => "io_clients",
            Indicator::CoreAudioConnections => "core_audio_connections",
        }
    }
}

/// Points one indicator added to the score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    pub indicator: Indicator,
    pub count: u32,
    pub points: u32,
}

/// Score calculator for converting snapshots into scores
pub struct ScoreCalculator;

impl ScoreCalculator {
    /// Compute the score of a snapshot
    pub fn compute(snapshot: &MetricsSnapshot, baseline_fds: u32) -> Score {
        Self::breakdown(snapshot, baseline_fds)
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.points))
    }

    /// Per-indicator contributions, omitting indicators that added nothing
    pub fn breakdown(snapshot: &MetricsSnapshot, baseline_fds: u32) -> Vec<Contribution> {
        let contributions = [
            (
                Indicator::PowerAssertions,
                snapshot.power_assertions,
                presence(snapshot.power_assertions, POWER_ASSERTION_POINTS),
            ),
            (
                Indicator::SlackAssertions,
                snapshot.slack_assertions,
                capped(snapshot.slack_assertions, SLACK_ASSERTION_POINTS, SLACK_ASSERTION_CAP),
            ),
            (
                Indicator::AudioUnits,
                snapshot.audio_units,
                capped(snapshot.audio_units, AUDIO_UNIT_POINTS, AUDIO_UNIT_CAP),
            ),
            (
                Indicator::HalPlugins,
                snapshot.ha_plugins,
                presence(snapshot.ha_plugins, HAL_PLUGIN_POINTS),
            ),
            (
                Indicator::AudioFds,
                snapshot.audio_fds,
                snapshot
                    .audio_fds
                    .saturating_sub(baseline_fds)
                    .saturating_mul(AUDIO_FD_POINTS),
            ),
            (
                Indicator::IoClients,
                snapshot.io_clients,
                presence(snapshot.io_clients, IO_CLIENT_POINTS),
            ),
            (
                Indicator::CoreAudioConnections,
                snapshot.core_audio_connections,
                presence(snapshot.core_audio_connections, CORE_AUDIO_POINTS),
            ),
        ];

        contributions
            .into_iter()
            .filter(|(_, _, points)| *points > 0)
            .map(|(indicator, count, points)| Contribution {
                indicator,
                count,
                points,
            })
            .collect()
    }
}

/// Flat bonus when the counter is non-zero
fn presence(count: u32, points: u32) -> u32 {
    if count > 0 {
        points
    } else {
        0
    }
}

/// Per-unit points, capped
fn capped(count: u32, points: u32, cap: u32) -> u32 {
    count.saturating_mul(points).min(cap)
}
