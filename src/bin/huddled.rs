//! huddled - command-line interface for Huddle Sense
//!
//! Commands:
//! - monitor: Calibrate, then detect huddles until interrupted
//! - replay: Run recorded snapshots through a fresh engine (deterministic)
//! - status: Read the published status as a display client would
//! - doctor: Diagnose sampler, status path and configuration
//! - schema: Print the published status schema

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use huddle_sense::clock::SystemClock;
use huddle_sense::config::DetectorConfig;
use huddle_sense::monitor::{replay_ndjson, HuddleMonitor};
use huddle_sense::publisher::{status_json_schema, JsonFilePublisher};
use huddle_sense::reader::{StatusRead, StatusReader};
use huddle_sense::sampler::CommandSampler;
use huddle_sense::{logging, HuddleError, HUDDLE_SENSE_VERSION, PRODUCER_NAME};

/// Set by SIGINT/SIGTERM; the monitor loop stops after the current cycle.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// huddled - infer live huddles from low-level OS signals
#[derive(Parser)]
#[command(name = "huddled")]
#[command(version = HUDDLE_SENSE_VERSION)]
#[command(about = "Detect live audio/video huddles and publish presence status", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate, then detect huddles until interrupted
    Monitor {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Status file path (defaults to /tmp/huddle-status-<user>.json)
        #[arg(long)]
        status_file: Option<PathBuf>,

        /// Milliseconds between cycles
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Samples averaged into the initial baseline
        #[arg(long)]
        calibration_samples: Option<u32>,

        /// Process whose audio handles are counted
        #[arg(long)]
        target: Option<String>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Run recorded snapshots through a fresh engine
    Replay {
        /// NDJSON snapshots (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// NDJSON status records (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Start from this baseline instead of calibrating on the first records
        #[arg(long)]
        baseline: Option<f64>,
    },

    /// Read the published status as a display client would
    Status {
        /// Status file path (defaults to /tmp/huddle-status-<user>.json)
        #[arg(long)]
        status_file: Option<PathBuf>,

        /// Records older than this are reported as stale
        #[arg(long, default_value = "10")]
        max_age_secs: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose sampler, status path and configuration
    Doctor {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the published status JSON schema
    Schema,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), HuddledError> {
    match cli.command {
        Commands::Monitor {
            config,
            status_file,
            interval_ms,
            calibration_samples,
            target,
            cycles,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(path) = status_file {
                config.status_path = Some(path);
            }
            if let Some(interval_ms) = interval_ms {
                config.interval_ms = interval_ms;
            }
            if let Some(samples) = calibration_samples {
                config.calibration_samples = samples;
            }
            if let Some(target) = target {
                config.target_process = target;
            }
            config.validate()?;
            cmd_monitor(config, cycles)
        }

        Commands::Replay {
            input,
            output,
            config,
            baseline,
        } => cmd_replay(&input, &output, config.as_deref(), baseline),

        Commands::Status {
            status_file,
            max_age_secs,
            json,
        } => cmd_status(status_file, max_age_secs, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&status_json_schema())?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig, HuddledError> {
    match path {
        Some(path) => Ok(DetectorConfig::load(path)?),
        None => Ok(DetectorConfig::default()),
    }
}

fn cmd_monitor(config: DetectorConfig, cycles: Option<u64>) -> Result<(), HuddledError> {
    install_stop_handlers();

    let status_path = config.resolved_status_path();
    let sampler = CommandSampler::new(config.target_process.clone(), config.command_timeout());
    let publisher = JsonFilePublisher::new(status_path.clone());
    let mut monitor = HuddleMonitor::new(config, sampler, publisher, SystemClock)?;

    tracing::info!(
        status_path = %status_path.display(),
        target = monitor.config().target_process.as_str(),
        interval_ms = monitor.config().interval_ms,
        "starting huddle monitor"
    );

    match monitor.calibrate(&STOP_REQUESTED) {
        Ok(_) => {}
        Err(HuddleError::Interrupted) => {
            tracing::info!("stopped during calibration");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    tracing::info!(
        start_threshold = monitor.machine().start_threshold(),
        end_peak_ratio = monitor.config().end_peak_ratio,
        end_baseline_margin = monitor.config().end_baseline_margin,
        "monitoring for huddles"
    );

    monitor.run(&STOP_REQUESTED, cycles);
    Ok(())
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    baseline: Option<f64>,
) -> Result<(), HuddledError> {
    let config = load_config(config)?;
    let ndjson = read_input(input)?;
    let records = replay_ndjson(&ndjson, config, baseline)?;

    let mut lines = String::new();
    for record in &records {
        lines.push_str(&serde_json::to_string(record)?);
        lines.push('\n');
    }

    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        stdout.write_all(lines.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(output, lines)?;
    }
    Ok(())
}

fn cmd_status(
    status_file: Option<PathBuf>,
    max_age_secs: i64,
    json: bool,
) -> Result<(), HuddledError> {
    let path = status_file.unwrap_or_else(huddle_sense::config::default_status_path);
    let read = StatusReader::read(&path);
    let now = chrono::Utc::now();
    let stale = read.is_stale(now, chrono::Duration::seconds(max_age_secs));

    match &read {
        StatusRead::Running(status) => {
            if json {
                println!("{}", serde_json::to_string_pretty(status)?);
            } else {
                let label = if status.in_huddle { "IN HUDDLE" } else { "No huddle" };
                println!(
                    "{label} | score {}{} | baseline {:.1} | peak {} | {}",
                    status.score,
                    status.trend.as_symbol(),
                    status.baseline,
                    status.peak_score,
                    status.timestamp.to_rfc3339()
                );
            }
            if stale {
                return Err(HuddledError::Stale(status.age(now).num_seconds()));
            }
            Ok(())
        }
        StatusRead::NotRunning { reason } => Err(HuddledError::NotRunning(reason.clone())),
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), HuddledError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, HUDDLE_SENSE_VERSION),
    });

    let loaded = match config {
        Some(path) => DetectorConfig::load(path),
        None => Ok(DetectorConfig::default()),
    };
    let config = match loaded {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Configuration valid".to_string(),
            });
            config
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            DetectorConfig::default()
        }
    };

    let status_path = config.resolved_status_path();
    let status_dir = status_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    checks.push(match probe_writable(&status_dir) {
        Ok(()) => DoctorCheck {
            name: "status_path".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} is writable", status_path.display()),
        },
        Err(e) => DoctorCheck {
            name: "status_path".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot write to {}: {}", status_dir.display(), e),
        },
    });

    for program in CommandSampler::PROGRAMS {
        let available = std::process::Command::new("which")
            .arg(program)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        checks.push(DoctorCheck {
            name: format!("sampler_{program}"),
            status: if available {
                CheckStatus::Ok
            } else {
                CheckStatus::Warning
            },
            message: if available {
                format!("{program} found")
            } else {
                format!("{program} not found; its counters will read as zero")
            },
        });
    }

    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        let root = unsafe { libc::geteuid() } == 0;
        checks.push(DoctorCheck {
            name: "privileges".to_string(),
            status: if root {
                CheckStatus::Ok
            } else {
                CheckStatus::Warning
            },
            message: if root {
                "Running as root".to_string()
            } else {
                "Not root; lsof may not see another user's handles".to_string()
            },
        });
    }

    checks.push(DoctorCheck {
        name: "stderr".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stderr) {
            "stderr is a TTY (human-readable logs)".to_string()
        } else {
            "stderr is redirected (consider --log-json)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: HUDDLE_SENSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("huddled Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(HuddledError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, HuddledError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

/// Check a directory accepts new files
fn probe_writable(dir: &Path) -> io::Result<()> {
    let probe = dir.join(format!(".huddled-probe-{}", std::process::id()));
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)
}

#[cfg(unix)]
extern "C" fn handle_stop_signal(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_stop_handlers() {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        unsafe {
            // SAFETY: handle_stop_signal only stores to an atomic flag, which is
            // async-signal-safe.
            let handler = handle_stop_signal as *const () as libc::sighandler_t;
            if libc::signal(signal, handler) == libc::SIG_ERR {
                tracing::warn!(signal, "failed to install stop handler");
            }
        }
    }
}

#[cfg(not(unix))]
fn install_stop_handlers() {}

// Error types

#[derive(Debug)]
enum HuddledError {
    Io(io::Error),
    Engine(HuddleError),
    Json(serde_json::Error),
    NotRunning(String),
    Stale(i64),
    DoctorFailed,
}

impl From<io::Error> for HuddledError {
    fn from(e: io::Error) -> Self {
        HuddledError::Io(e)
    }
}

impl From<HuddleError> for HuddledError {
    fn from(e: HuddleError) -> Self {
        HuddledError::Engine(e)
    }
}

impl From<serde_json::Error> for HuddledError {
    fn from(e: serde_json::Error) -> Self {
        HuddledError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HuddledError> for CliError {
    fn from(e: HuddledError) -> Self {
        match e {
            HuddledError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HuddledError::Engine(e @ HuddleError::CalibrationFailed { .. }) => CliError {
                code: "CALIBRATION_FAILED".to_string(),
                message: e.to_string(),
                hint: Some("Run 'huddled doctor' and check sampler permissions".to_string()),
            },
            HuddledError::Engine(e @ HuddleError::InvalidConfig(_)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: e.to_string(),
                hint: Some("Fix the configuration file and retry".to_string()),
            },
            HuddledError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            HuddledError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HuddledError::NotRunning(reason) => CliError {
                code: "NOT_RUNNING".to_string(),
                message: format!("Detector not running: {reason}"),
                hint: Some("Start it with 'huddled monitor'".to_string()),
            },
            HuddledError::Stale(age) => CliError {
                code: "STALE_STATUS".to_string(),
                message: format!("Last status is {age}s old"),
                hint: Some("The detector may have stopped or stalled".to_string()),
            },
            HuddledError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
