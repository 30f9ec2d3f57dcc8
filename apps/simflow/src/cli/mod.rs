//! # simflow CLI Module
//!
//! ## Project Commands
//!
//! - `submit` - Submit a stage as a job array
//! - `clean` - Delete a stage's (or the whole project's) outputs
//! - `check` - Compare produced events with targets, write makeup counts
//! - `status` - Summarise the scheduler state of a stage's job
//! - `statistics` - Save the accounting report of a stage's job
//!
//! ## Job Commands
//!
//! Called from inside array tasks:
//!
//! - `file declare` - Record a produced file
//! - `file set-events` - Correct a file's event count
//! - `file claim` - Claim input files from the upstream stage
//! - `file confirm` - Confirm claimed files were processed
//! - `file reset` - Release unconfirmed claims

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use simflow_core::{FileType, SimflowError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// simflow - batch project manager for staged simulation pipelines
#[derive(Parser, Debug)]
#[command(name = "simflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the project file
    #[arg(short, long, global = true, default_value = "project.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a stage as a job array
    Submit {
        /// Stage to submit
        stage: String,
    },

    /// Delete outputs, registry records and work directories
    Clean {
        /// Stage to clean; every stage and the project directories if omitted
        stage: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Report produced events against targets
    Check {
        /// Stage to check; every stage if omitted
        stage: Option<String>,
    },

    /// Show scheduler state of a stage's job
    Status {
        /// Stage to query
        stage: String,
    },

    /// Save the accounting report of a stage's job
    Statistics {
        /// Stage to query
        stage: String,
    },

    /// File hand-off commands run by jobs
    #[command(subcommand)]
    File(FileCommands),
}

/// Job-side registry commands.
#[derive(Subcommand, Debug)]
pub enum FileCommands {
    /// Record a produced file
    Declare {
        /// Stage that produced the file
        stage: String,

        /// Absolute path of the file
        path: PathBuf,

        /// File type
        #[arg(short = 't', long = "type", value_enum, default_value = "primary")]
        file_type: FileKind,

        /// Number of events, if known
        #[arg(short, long)]
        nevents: Option<u64>,
    },

    /// Correct the event count of a file
    SetEvents {
        /// File identifier
        id: u64,

        /// Number of events
        nevents: u64,
    },

    /// Claim input files for one job
    Claim {
        /// Consuming stage
        stage: String,

        /// Files to claim (defaults to the stage's n_files)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Confirm claimed files were processed
    Confirm {
        /// Consuming stage
        stage: String,

        /// File identifiers
        #[arg(required = true, num_args = 1..)]
        ids: Vec<u64>,
    },

    /// Release every unconfirmed claim of a stage
    Reset {
        /// Consuming stage
        stage: String,
    },
}

/// File type as written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FileKind {
    Primary,
    Analysis,
}

impl From<FileKind> for FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Primary => FileType::Primary,
            FileKind::Analysis => FileType::Analysis,
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), SimflowError> {
    let json_mode = cli.json_mode;
    let mut orchestrator = open_orchestrator(&cli.config)?;

    match cli.command {
        Commands::Submit { stage } => cmd_submit(&mut orchestrator, json_mode, &stage).await,
        Commands::Clean { stage, yes } => {
            cmd_clean(&mut orchestrator, json_mode, stage.as_deref(), yes)
        }
        Commands::Check { stage } => cmd_check(&mut orchestrator, json_mode, stage.as_deref()),
        Commands::Status { stage } => cmd_status(&orchestrator, json_mode, &stage).await,
        Commands::Statistics { stage } => cmd_statistics(&orchestrator, json_mode, &stage).await,
        Commands::File(file) => match file {
            FileCommands::Declare {
                stage,
                path,
                file_type,
                nevents,
            } => cmd_declare(
                &mut orchestrator,
                json_mode,
                &stage,
                &path,
                file_type.into(),
                nevents,
            ),
            FileCommands::SetEvents { id, nevents } => {
                cmd_set_events(&mut orchestrator, json_mode, id, nevents)
            }
            FileCommands::Claim { stage, count } => {
                cmd_claim(&mut orchestrator, json_mode, &stage, count)
            }
            FileCommands::Confirm { stage, ids } => {
                cmd_confirm(&mut orchestrator, json_mode, &stage, &ids)
            }
            FileCommands::Reset { stage } => cmd_reset(&mut orchestrator, json_mode, &stage),
        },
    }
}
