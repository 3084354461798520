//! Relay CLI - Command-line interface for Workout Relay
//!
//! Commands:
//! - run: Replay a heart rate recording through a live workout session
//! - validate: Validate a heart rate sample file
//! - doctor: Diagnose configuration and server reachability

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use workout_relay::sources::{SampleFile, SampleFileError};
use workout_relay::types::HeartRateSample;
use workout_relay::{
    AlwaysGranted, ControllerOutcome, HttpTransport, MemorySource, RelayConfig, TracingDisplay,
    WorkoutController, WorkoutDisplay, WorkoutEngine, WorkoutError, PRODUCER_NAME, RELAY_VERSION,
};

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay - Live heart rate relay for workout sessions
#[derive(Parser)]
#[command(name = "relay")]
#[command(author = "Synheart AI Inc")]
#[command(version = RELAY_VERSION)]
#[command(about = "Relay live heart rate readings to a workout server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a heart rate recording through a live workout session
    Run {
        /// Sample file path (use - for stdin)
        #[arg(short, long)]
        samples: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Server base URL (overrides the config file)
        #[arg(long)]
        server: Option<String>,

        /// Relay configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session length in seconds (default: until the last sample is reported)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Validate a heart rate sample file
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and server reachability
    Doctor {
        /// Server base URL (overrides the config file)
        #[arg(long)]
        server: Option<String>,

        /// Relay configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one sample per line)
    Ndjson,
    /// JSON array of samples
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
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

async fn run(cli: Cli) -> Result<(), RelayCliError> {
    match cli.command {
        Commands::Run {
            samples,
            input_format,
            server,
            config,
            duration,
        } => {
            cmd_run(
                &samples,
                input_format,
                server,
                config.as_deref(),
                duration.map(Duration::from_secs),
            )
            .await
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor {
            server,
            config,
            json,
        } => cmd_doctor(server, config.as_deref(), json).await,
    }
}

fn read_input(path: &Path) -> Result<String, RelayCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn parse_samples(
    input: &str,
    input_format: InputFormat,
) -> Result<Vec<HeartRateSample>, RelayCliError> {
    let samples = match input_format {
        InputFormat::Ndjson => SampleFile::parse_ndjson(input)?,
        InputFormat::Json => SampleFile::parse_array(input)?,
    };
    Ok(samples)
}

fn load_config(server: Option<String>, path: Option<&Path>) -> Result<RelayConfig, RelayCliError> {
    let mut config = match path {
        Some(path) => RelayConfig::from_json(&fs::read_to_string(path)?)?,
        None => RelayConfig::default(),
    };
    if let Some(server) = server {
        config.base_url = server;
    }
    config.validate()?;
    Ok(config)
}

/// Display that logs like [`TracingDisplay`] and remembers the last failure
#[derive(Default)]
struct CliDisplay {
    last_failure: Mutex<Option<String>>,
}

impl CliDisplay {
    fn take_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl WorkoutDisplay for CliDisplay {
    fn show_busy(&self, message: &str) {
        TracingDisplay.show_busy(message);
    }

    fn hide_busy(&self) {
        TracingDisplay.hide_busy();
    }

    fn show_failure(&self, message: &str) {
        TracingDisplay.show_failure(message);
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    fn update_reading_display(&self, text: &str) {
        TracingDisplay.update_reading_display(text);
    }
}

#[derive(Serialize)]
struct RunSummary {
    session_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    samples_replayed: usize,
    last_reading_bpm: Option<i32>,
}

async fn cmd_run(
    samples_path: &Path,
    input_format: InputFormat,
    server: Option<String>,
    config_path: Option<&Path>,
    duration: Option<Duration>,
) -> Result<(), RelayCliError> {
    let config = load_config(server, config_path)?;

    let samples = parse_samples(&read_input(samples_path)?, input_format)?;
    if samples.is_empty() {
        return Err(RelayCliError::NoSamples);
    }
    let issues = SampleFile::validate_samples(&samples);
    if !issues.is_empty() {
        return Err(RelayCliError::ValidationFailed(issues.len()));
    }

    let source = Arc::new(MemorySource::new());
    let display = Arc::new(CliDisplay::default());
    let transport = Arc::new(HttpTransport::new(&config)?);
    info!(endpoint = %transport.endpoint(), samples = samples.len(), "Replaying recording");

    let engine = WorkoutEngine::new(
        &config,
        transport,
        source.clone(),
        Arc::new(AlwaysGranted),
        display.clone(),
    )?;
    let controller = WorkoutController::new(engine, display.clone());

    if controller.on_start_requested().await == ControllerOutcome::Exit {
        let message = display
            .take_failure()
            .unwrap_or_else(|| "workout did not start".to_string());
        return Err(RelayCliError::Session(message));
    }

    let session = controller.engine().snapshot().session;
    let replay = SampleFile::rebase(&samples, session.start_time);
    let replay_length = replay.last().map(|(delay, _)| *delay).unwrap_or_default();
    let session_length = duration.unwrap_or(replay_length + config.tick_interval() * 2);

    let started = Instant::now();
    let feeder = {
        let source = source.clone();
        tokio::spawn(async move {
            let mut replayed = 0;
            for (delay, sample) in replay {
                tokio::time::sleep_until(started + delay).await;
                source.push(sample);
                replayed += 1;
            }
            replayed
        })
    };

    tokio::select! {
        _ = tokio::time::sleep_until(started + session_length) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, finishing workout");
        }
    }

    feeder.abort();
    let samples_replayed = match feeder.await {
        Ok(replayed) => replayed,
        Err(_) => source.len(),
    };

    controller.on_stop_requested().await;
    let stop_failure = display.take_failure();
    let snapshot = controller.engine().snapshot();

    let summary = RunSummary {
        session_id: snapshot.session.id.to_string(),
        start_time: session.start_time,
        end_time: snapshot.session.end_time,
        samples_replayed,
        last_reading_bpm: snapshot.reading.map(|r| r.bpm),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match stop_failure {
        Some(message) => Err(RelayCliError::Session(message)),
        None => Ok(()),
    }
}

#[derive(Serialize)]
struct ValidationReport {
    total_samples: usize,
    valid_samples: usize,
    invalid_samples: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    error: String,
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), RelayCliError> {
    let samples = parse_samples(&read_input(input)?, input_format)?;
    let issues = SampleFile::validate_samples(&samples);

    let report = ValidationReport {
        total_samples: samples.len(),
        valid_samples: samples.len() - issues.len(),
        invalid_samples: issues.len(),
        errors: issues
            .iter()
            .map(|issue| ValidationErrorDetail {
                index: issue.index,
                error: issue.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total samples:   {}", report.total_samples);
        println!("Valid samples:   {}", report.valid_samples);
        println!("Invalid samples: {}", report.invalid_samples);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Sample {}: {}", err.index, err.error);
            }
        }
    }

    if report.invalid_samples > 0 {
        Err(RelayCliError::ValidationFailed(report.invalid_samples))
    } else {
        Ok(())
    }
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

async fn cmd_doctor(
    server: Option<String>,
    config_path: Option<&Path>,
    json: bool,
) -> Result<(), RelayCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "relay_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Relay version {}", RELAY_VERSION),
    });

    match load_config(server, config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: match config_path {
                    Some(path) => format!("Loaded {}", path.display()),
                    None => "Using built-in defaults".to_string(),
                },
            });
            checks.push(DoctorCheck {
                name: "timing".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Tick every {} ms, request timeout {} ms",
                    config.tick_interval_ms, config.request_timeout_ms
                ),
            });
            match config.endpoint() {
                Ok(endpoint) => {
                    checks.push(DoctorCheck {
                        name: "endpoint".to_string(),
                        status: CheckStatus::Ok,
                        message: endpoint.to_string(),
                    });
                    checks.push(check_reachability(&endpoint).await);
                }
                Err(e) => checks.push(DoctorCheck {
                    name: "endpoint".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: RELAY_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Relay Doctor Report");
        println!("===================");
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
        Err(RelayCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Open a TCP connection to the server; an unreachable server is only a warning
async fn check_reachability(endpoint: &reqwest::Url) -> DoctorCheck {
    let (Some(host), Some(port)) = (endpoint.host_str(), endpoint.port_or_known_default()) else {
        return DoctorCheck {
            name: "server".to_string(),
            status: CheckStatus::Warning,
            message: "Endpoint has no host or port".to_string(),
        };
    };

    let status = match tokio::time::timeout(REACHABILITY_TIMEOUT, TcpStream::connect((host, port)))
        .await
    {
        Ok(Ok(_)) => (CheckStatus::Ok, format!("{host}:{port} is reachable")),
        Ok(Err(e)) => (
            CheckStatus::Warning,
            format!("{host}:{port} is not reachable: {e}"),
        ),
        Err(_) => (
            CheckStatus::Warning,
            format!("{host}:{port} did not answer within {REACHABILITY_TIMEOUT:?}"),
        ),
    };

    DoctorCheck {
        name: "server".to_string(),
        status: status.0,
        message: status.1,
    }
}

// Error handling

#[derive(Debug)]
enum RelayCliError {
    Io(io::Error),
    Samples(SampleFileError),
    Json(serde_json::Error),
    Relay(WorkoutError),
    Session(String),
    NoSamples,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for RelayCliError {
    fn from(e: io::Error) -> Self {
        RelayCliError::Io(e)
    }
}

impl From<SampleFileError> for RelayCliError {
    fn from(e: SampleFileError) -> Self {
        RelayCliError::Samples(e)
    }
}

impl From<serde_json::Error> for RelayCliError {
    fn from(e: serde_json::Error) -> Self {
        RelayCliError::Json(e)
    }
}

impl From<WorkoutError> for RelayCliError {
    fn from(e: WorkoutError) -> Self {
        RelayCliError::Relay(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RelayCliError> for CliError {
    fn from(e: RelayCliError) -> Self {
        match e {
            RelayCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RelayCliError::Samples(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Each sample needs RFC 3339 \"start\" and \"end\" plus a numeric \"bpm\""
                        .to_string(),
                ),
            },
            RelayCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RelayCliError::Relay(e @ WorkoutError::Config(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'relay doctor' to inspect the configuration".to_string()),
            },
            RelayCliError::Relay(e) => CliError {
                code: "RELAY_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            RelayCliError::Session(message) => CliError {
                code: "SESSION_FAILED".to_string(),
                message,
                hint: Some("Run 'relay doctor' to check that the server is reachable".to_string()),
            },
            RelayCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            RelayCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Run 'relay validate' for details".to_string()),
            },
            RelayCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor output above".to_string()),
            },
        }
    }
}
