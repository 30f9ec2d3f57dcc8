//! # Scheduler Module
//!
//! The batch system seen from the orchestrator: submit a job array, ask how
//! its tasks are doing, fetch accounting records.
//!
//! [`SlurmScheduler`] drives `sbatch`, `squeue` and `sacct`. Tests swap in
//! their own implementation of [`Scheduler`].

mod process;
mod slurm;

pub use process::{CommandOutput, run_command};
pub use slurm::{SlurmScheduler, parse_job_id, parse_queue};

use serde::Serialize;
use simflow_core::SimflowError;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

// =============================================================================
// REQUESTS AND RESULTS
// =============================================================================

/// One job array to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRequest {
    /// Batch script run by every task.
    pub script: PathBuf,
    /// Directory the scheduler command runs in.
    pub work_dir: PathBuf,
    /// Number of array tasks.
    pub n_tasks: u32,
    /// Maximum tasks running at once.
    pub concurrency: u32,
}

/// What happened when the array was handed to the scheduler.
///
/// Returned even when the scheduler rejected the array, so the caller can
/// keep its logs; `job_id` is only set on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The command line, as recorded next to the script.
    pub command: String,
    pub output: CommandOutput,
    pub job_id: Option<String>,
}

/// Task counts by scheduler state for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub states: BTreeMap<String, u64>,
}

impl QueueSummary {
    /// Tasks still known to the queue.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.states.values().copied().fold(0, u64::saturating_add)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// =============================================================================
// SCHEDULER TRAIT
// =============================================================================

/// A batch system able to run job arrays.
pub trait Scheduler {
    /// Enqueue `n_tasks` copies of the script.
    ///
    /// `Err` only when the command could not be run at all or timed out.
    fn submit_array(
        &self,
        request: &ArrayRequest,
    ) -> impl Future<Output = Result<Submission, SimflowError>> + Send;

    /// Current task states of a submitted job.
    fn queue_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<QueueSummary, SimflowError>> + Send;

    /// Raw accounting report for a job.
    fn accounting(&self, job_id: &str)
    -> impl Future<Output = Result<String, SimflowError>> + Send;
}
