//! # simflow - Staged Simulation Project Manager
//!
//! Submits the stages of a simulation pipeline to SLURM as job arrays and
//! tracks what they produce.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   apps/simflow (THE BINARY)                │
//! │                                                            │
//! │  ┌─────────────┐    ┌──────────────┐    ┌───────────────┐  │
//! │  │    CLI      │───▶│ Orchestrator │───▶│    SLURM      │  │
//! │  │   (clap)    │    │              │    │ (sbatch etc.) │  │
//! │  └─────────────┘    └──────┬───────┘    └───────────────┘  │
//! │                            ▼                               │
//! │                    ┌───────────────┐                       │
//! │                    │ simflow-core  │                       │
//! │                    │ (THE LEDGER)  │                       │
//! │                    └───────────────┘                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Project actions
//! simflow --config nue.toml submit generation
//! simflow --config nue.toml check
//! simflow --config nue.toml status generation
//! simflow --config nue.toml clean generation --yes
//!
//! # Inside an array task
//! simflow --config nue.toml file claim reconstruction
//! simflow --config nue.toml file declare reconstruction /data/reco/out_3.root --nevents 250
//! simflow --config nue.toml file confirm reconstruction 12 13
//! ```

use clap::Parser;
use simflow::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing. SIMFLOW_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("SIMFLOW_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "simflow=debug,simflow_core=debug"
    } else {
        "simflow=info,simflow_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the simflow banner to stderr.
fn print_banner() {
    eprintln!("simflow v{} - staged simulation project manager", env!("CARGO_PKG_VERSION"));
}
