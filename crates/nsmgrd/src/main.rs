//! nsmgrd - namespace network topology manager
//!
//! Entry point: loads the topology document and runs one pass over it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use nsmgr_common::{DryRunNetworkState, NetworkState, ShellNetworkState};
use nsmgrd::{NetworkConfig, Orchestrator, RunReport, CONFIG_ENV, DEFAULT_CONFIG_PATH};

/// Namespace network topology manager
#[derive(Parser, Debug)]
#[command(name = "nsmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology document
    #[arg(short = 'c', long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Probe the host but only record changes
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Converge the host onto the document (default)
    Apply,
    /// Remove what the document declares, in reverse order
    Teardown,
    /// Show the commands an apply would run
    Plan,
}

/// Initializes tracing with an `EnvFilter`, `RUST_LOG` first
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn print_report(label: &str, report: &RunReport) {
    println!("{} complete: {}", label, report.summary());
}

/// Runs the selected pass and prints its report
async fn run(args: Args) -> anyhow::Result<RunReport> {
    let command = args.command.unwrap_or(Command::Apply);

    let config = NetworkConfig::load(&args.config)
        .with_context(|| format!("loading topology from {}", args.config.display()))?;

    let recorder = (args.dry_run || command == Command::Plan)
        .then(|| Arc::new(DryRunNetworkState::new()));
    let net: Arc<dyn NetworkState> = match &recorder {
        Some(dry) => dry.clone(),
        None => Arc::new(ShellNetworkState),
    };
    let orchestrator = Orchestrator::new(net);

    let (label, report) = match command {
        Command::Apply => ("apply", orchestrator.apply(&config).await),
        Command::Teardown => ("teardown", orchestrator.teardown(&config).await),
        Command::Plan => ("plan", orchestrator.apply(&config).await),
    };

    if let Some(dry) = recorder {
        let recorded = dry.recorded();
        println!("{} command(s) would run:", recorded.len());
        for cmd in recorded {
            println!("  {}", cmd);
        }
    }
    print_report(label, &report);
    Ok(report)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting nsmgrd ---");

    match run(args).await {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(report) => {
            error!("{} entries failed", report.failed());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("nsmgrd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
