//! macOS command-line sampler
//!
//! Reads counters from `lsof` (open audio handles of the target process),
//! `pmset -g assertions` (power assertions) and `ioreg` (audio engines).
//! Every command runs under its own timeout; a failed command counts as zero
//! and the sample only fails when every command fails.

use super::MetricsSampler;
use crate::error::HuddleError;
use crate::types::MetricsSnapshot;
use chrono::Utc;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Counters derived from `lsof` output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LsofCounts {
    pub audio_fds: u32,
    pub audio_units: u32,
    pub hal_plugins: u32,
    pub core_audio_connections: u32,
}

impl LsofCounts {
    pub fn parse(output: &str) -> Self {
        let mut counts = Self::default();
        for line in output.lines() {
            if line.to_ascii_lowercase().contains("audio") {
                counts.audio_fds += 1;
            }
            if line.contains("AudioToolbox") {
                counts.audio_units += 1;
            }
            if line.contains("HAL") {
                counts.hal_plugins += 1;
            }
            if line.contains("coreaudio") {
                counts.core_audio_connections += 1;
            }
        }
        counts
    }
}

/// Counters derived from `pmset -g assertions` output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmsetCounts {
    pub power_assertions: u32,
    pub target_assertions: u32,
}

impl PmsetCounts {
    pub fn parse(output: &str, target: &str) -> Self {
        let mut counts = Self::default();
        for line in output.lines() {
            if line.to_ascii_lowercase().contains("audio") {
                counts.power_assertions += 1;
            }
            if !target.is_empty() && line.contains(target) {
                counts.target_assertions += 1;
            }
        }
        counts
    }
}

/// Count audio engine entries in `ioreg -r -c IOAudioEngine` output
pub fn parse_ioreg(output: &str) -> u32 {
    output
        .lines()
        .filter(|line| line.contains("IOAudioEngine"))
        .count() as u32
}

/// Sampler shelling out to the macOS diagnostics tools
#[derive(Debug, Clone)]
pub struct CommandSampler {
    target: String,
    timeout: Duration,
}

impl CommandSampler {
    /// Programs the sampler depends on
    pub const PROGRAMS: [&'static str; 3] = ["lsof", "pmset", "ioreg"];

    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn lsof(&self) -> Result<LsofCounts, HuddleError> {
        let output = run_with_timeout("lsof", &["-n", "-P", "-c", &self.target], self.timeout)?;
        Ok(LsofCounts::parse(&output))
    }

    fn pmset(&self) -> Result<PmsetCounts, HuddleError> {
        let output = run_with_timeout("pmset", &["-g", "assertions"], self.timeout)?;
        Ok(PmsetCounts::parse(&output, &self.target))
    }

    fn ioreg(&self) -> Result<u32, HuddleError> {
        // ioreg walks the whole registry and is slower than the others
        let output = run_with_timeout(
            "ioreg",
            &["-r", "-c", "IOAudioEngine"],
            self.timeout.saturating_mul(2),
        )?;
        Ok(parse_ioreg(&output))
    }
}

impl MetricsSampler for CommandSampler {
    fn sample(&mut self) -> Result<MetricsSnapshot, HuddleError> {
        let captured_at = Utc::now();
        let lsof = self.lsof();
        let pmset = self.pmset();
        let ioreg = self.ioreg();

        if let (Err(a), Err(b), Err(c)) = (&lsof, &pmset, &ioreg) {
            return Err(HuddleError::Sampling(format!(
                "all probes failed: lsof: {a}; pmset: {b}; ioreg: {c}"
            )));
        }

        let lsof = lsof.unwrap_or_else(|e| {
            warn!(error = %e, "lsof probe failed");
            LsofCounts::default()
        });
        let pmset = pmset.unwrap_or_else(|e| {
            warn!(error = %e, "pmset probe failed");
            PmsetCounts::default()
        });
        let io_clients = ioreg.unwrap_or_else(|e| {
            warn!(error = %e, "ioreg probe failed");
            0
        });

        let snapshot = MetricsSnapshot {
            power_assertions: pmset.power_assertions,
            slack_assertions: pmset.target_assertions,
            audio_units: lsof.audio_units,
            ha_plugins: lsof.hal_plugins,
            audio_fds: lsof.audio_fds,
            io_clients,
            core_audio_connections: lsof.core_audio_connections,
            captured_at,
        };
        debug!(?snapshot, "sampled metrics");
        Ok(snapshot)
    }
}

/// Run a program, killing it if it outlives `timeout`.
///
/// Stdout is drained on a separate thread so a chatty child cannot block on a
/// full pipe. Exit status is ignored: only the captured output matters.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, HuddleError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| HuddleError::Sampling(format!("{program}: {e}")))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| HuddleError::Sampling(format!("{program}: stdout unavailable")))?;
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HuddleError::SamplingTimeout {
                        command: program.to_string(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(HuddleError::Sampling(format!("{program}: {e}"))),
        }
    }

    let buf = reader
        .join()
        .map_err(|_| HuddleError::Sampling(format!("{program}: output reader panicked")))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
