//! # simflow
//!
//! The application side of simflow: command-line parsing, the stage
//! orchestrator and the SLURM scheduler glue. Bookkeeping lives in
//! `simflow-core`.

pub mod cli;
pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::StageOrchestrator;
pub use scheduler::{Scheduler, SlurmScheduler};
