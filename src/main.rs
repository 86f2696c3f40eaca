//! herbarium-labels
//!
//! Fetches observations and prints herbarium label data.
//!
//! # Architecture Overview
//!
//! ```text
//!   identifiers ──▶ dispatch (worker pool) ──▶ providers ──▶ governance ──▶ net ──▶ upstream APIs
//!                        │                                    │
//!                        ▼                                    ├─ rate window
//!                     labels ──▶ stdout                       ├─ concurrency governor
//!                                                             ├─ retrying fetcher
//!   progress lines ◀── observability (sink, logs, metrics)    └─ taxon coalescer
//! ```
//!
//! Exit status: 0 when every label was built, 1 when any item failed, 2 when
//! the configuration or setup was invalid, 130 when interrupted.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use herbarium_labels::config::{load_config, validate_config, ConfigError, ConfigOverrides};
use herbarium_labels::labels::{render_json, render_text, FieldLabelBuilder};
use herbarium_labels::net::HttpTransport;
use herbarium_labels::observability::{logging, metrics, ConsoleSink, ProgressSink};
use herbarium_labels::{Dispatcher, LabelsConfig, ObservationSource};

#[derive(Parser)]
#[command(name = "herbarium-labels", version)]
#[command(about = "Fetch iNaturalist and Mushroom Observer observations and print herbarium labels", long_about = None)]
struct Cli {
    /// Observation numbers, URLs, or Mushroom Observer ids (mo:123, MO123)
    #[arg(required = true, value_name = "OBSERVATION")]
    observations: Vec<String>,

    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Concurrent workers
    #[arg(short, long, env = "LABELS_WORKERS")]
    workers: Option<usize>,

    /// iNaturalist requests per minute (0 or less disables limiting)
    #[arg(long, env = "LABELS_RPM", allow_negative_numbers = true)]
    rpm: Option<i64>,

    /// iNaturalist calls allowed before spacing kicks in
    #[arg(long, env = "LABELS_BURST")]
    burst: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, env = "LABELS_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Total backoff allowed per fetch, in seconds
    #[arg(long, env = "LABELS_WAIT_BUDGET_SECS")]
    wait_budget_secs: Option<u64>,

    /// Ancestor batching window in milliseconds
    #[arg(long, env = "LABELS_BATCH_WINDOW_MS")]
    batch_window_ms: Option<u64>,

    /// Maximum taxa per batched lookup
    #[arg(long, env = "LABELS_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Suppress retry notices
    #[arg(short, long, env = "LABELS_QUIET")]
    quiet: bool,

    /// Print labels as JSON (progress moves to stderr)
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            workers: self.workers,
            requests_per_minute: self.rpm,
            burst: self.burst,
            request_timeout_secs: self.timeout_secs,
            total_wait_budget_secs: self.wait_budget_secs,
            batch_window_ms: self.batch_window_ms,
            batch_size: self.batch_size,
            quiet: self.quiet,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        observations = cli.observations.len(),
        workers = config.dispatch.workers,
        "herbarium-labels starting"
    );

    if let Some(address) = &config.observability.metrics_address {
        match address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(metrics_address = %address, "Failed to parse metrics address"),
        }
    }

    match run(&cli, &config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

fn build_config(cli: &Cli) -> Result<LabelsConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LabelsConfig::default(),
    };
    cli.overrides().apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

async fn run(cli: &Cli, config: &LabelsConfig) -> Result<ExitCode, Box<dyn Error>> {
    let quiet = config.observability.quiet;
    let sink: Arc<dyn ProgressSink> = if cli.json {
        Arc::new(ConsoleSink::stderr(quiet))
    } else {
        Arc::new(ConsoleSink::stdout(quiet))
    };

    let transport = Arc::new(HttpTransport::new(
        &config.user_agent,
        config.retry.request_timeout(),
    )?);
    let source = Arc::new(ObservationSource::new(config, transport, sink.clone()));
    let dispatcher = Dispatcher::new(
        source,
        Arc::new(FieldLabelBuilder),
        config.dispatch.workers,
        sink,
    );

    let report = tokio::select! {
        report = dispatcher.run(cli.observations.clone()) => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, abandoning in-flight requests");
            eprintln!("Interrupted");
            return Ok(ExitCode::from(130));
        }
    };

    let labels = report.labels();
    if cli.json {
        println!("{}", render_json(&labels)?);
    } else if !labels.is_empty() {
        println!();
        print!("{}", render_text(&labels));
    }

    if !report.all_succeeded() {
        eprintln!();
        eprintln!("Failed observations:");
        for (input, reason) in report.failures() {
            eprintln!("  {input}: {reason}");
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
