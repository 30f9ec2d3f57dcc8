//! # Stage Orchestrator
//!
//! Sequences the project actions: submit, clean, check, status and
//! statistics, plus the file hand-off calls made from inside running jobs.
//!
//! The orchestrator owns the project configuration, a registry source and
//! a scheduler. It keeps no state of its own between calls; what must
//! survive (job id, makeup count, scheduler logs) is written to the stage
//! work directory.
//!
//! A registry handle is taken only for the registry calls of one action
//! and dropped before any scheduler command is awaited, so array tasks
//! claiming files are never blocked behind `sbatch` or `squeue`.
//!
//! ## Stage Work Directory
//!
//! ```text
//! <top_dir>/work/<stage>/
//!     <project>.<stage>_submission_script.slurm
//!     slurm_submission_command.txt
//!     submission_log.out / submission_log.err
//!     current_running_jobid
//!     makeup_jobs.txt
//!     sacct_long_job_<id>.out
//! ```

use crate::scheduler::{ArrayRequest, QueueSummary, Scheduler};
use serde::Serialize;
use simflow_core::{
    CompletionEvaluator, CompletionReport, ConsumptionTracker, DatasetRegistry, FileId,
    FileRecord, FileType, ProjectConfig, RegistrySource, SimflowError, StageConfig,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Command line given to the scheduler.
pub const COMMAND_RECORD: &str = "slurm_submission_command.txt";
/// Scheduler stdout at submission.
pub const SUBMISSION_STDOUT: &str = "submission_log.out";
/// Scheduler stderr at submission.
pub const SUBMISSION_STDERR: &str = "submission_log.err";
/// Job id of the last successful submission.
pub const JOB_ID_FILE: &str = "current_running_jobid";
/// Makeup count written by `check`.
pub const MAKEUP_FILE: &str = "makeup_jobs.txt";

// =============================================================================
// RESULTS
// =============================================================================

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitSummary {
    pub stage: String,
    pub job_id: String,
    pub n_tasks: u32,
    pub script: PathBuf,
}

/// Completion figures for one stage, as shown by `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCheck {
    #[serde(flatten)]
    pub report: CompletionReport,
    /// Non-positive means complete.
    pub makeup_jobs: i64,
}

/// Scheduler view of a stage's current job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub stage: String,
    pub job_id: String,
    pub queue: QueueSummary,
}

/// What `clean` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub stages: Vec<String>,
    pub files_deleted: usize,
    pub records_dropped: usize,
    pub directories_removed: Vec<PathBuf>,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Project actions over a registry source `R` and a scheduler `S`.
pub struct StageOrchestrator<R: RegistrySource, S: Scheduler> {
    project: ProjectConfig,
    /// Absolute path of the project file, passed on to every job.
    config_path: PathBuf,
    registry: R,
    scheduler: S,
}

impl<R: RegistrySource, S: Scheduler> StageOrchestrator<R, S> {
    pub fn new(project: ProjectConfig, config_path: PathBuf, registry: R, scheduler: S) -> Self {
        Self {
            project,
            config_path,
            registry,
            scheduler,
        }
    }

    #[must_use]
    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    /// Where registry handles come from.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    #[must_use]
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    // =========================================================================
    // SUBMIT
    // =========================================================================

    /// Prepare directories, register the dataset, write the batch script and
    /// enqueue `n_jobs` array tasks.
    ///
    /// # Errors
    ///
    /// `IoError` when the stage work directory is not empty (clean the stage
    /// first), `ExternalTool` when the scheduler rejects the array.
    pub async fn submit(&mut self, stage_name: &str) -> Result<SubmitSummary, SimflowError> {
        let stage = self.project.stage(stage_name)?.clone();
        let work_dir = self.project.stage_work_dir(&stage);

        create_dir(stage.output_directory())?;
        create_dir(&self.project.work_dir())?;
        create_dir(&work_dir)?;

        if !is_empty_dir(&work_dir)? {
            return Err(SimflowError::IoError(format!(
                "Stage work directory {} is not empty; clean stage {} before resubmitting",
                work_dir.display(),
                stage.name()
            )));
        }

        // The handle is released here, before the scheduler is awaited.
        self.registry
            .acquire()?
            .create_dataset(stage.output_dataset(), self.project.input_dataset(&stage))?;

        let job_name = job_name(&self.project, &stage);
        let script = work_dir.join(format!("{job_name}_submission_script.slurm"));
        write_file(
            &script,
            &render_script(&self.project, &stage, &self.config_path),
        )?;

        let request = ArrayRequest {
            script: script.clone(),
            work_dir: work_dir.clone(),
            n_tasks: stage.n_jobs(),
            concurrency: stage
                .concurrent_jobs()
                .unwrap_or(self.project.scheduler().concurrent_jobs),
        };

        tracing::info!(
            stage = stage.name(),
            n_tasks = request.n_tasks,
            concurrency = request.concurrency,
            "submitting job array"
        );
        let submission = self.scheduler.submit_array(&request).await?;

        write_file(&work_dir.join(COMMAND_RECORD), &submission.command)?;
        write_file(&work_dir.join(SUBMISSION_STDOUT), &submission.output.stdout)?;
        write_file(&work_dir.join(SUBMISSION_STDERR), &submission.output.stderr)?;

        let job_id = match submission.job_id {
            Some(id) if submission.output.success() => id,
            _ => {
                return Err(SimflowError::ExternalTool {
                    command: submission.command,
                    status: submission.output.status,
                    stderr: submission.output.stderr,
                });
            }
        };
        write_file(&work_dir.join(JOB_ID_FILE), &job_id)?;

        tracing::info!(stage = stage.name(), job_id = %job_id, "submitted job array");
        Ok(SubmitSummary {
            stage: stage.name().to_string(),
            job_id,
            n_tasks: request.n_tasks,
            script,
        })
    }

    // =========================================================================
    // CLEAN
    // =========================================================================

    /// Print what `clean` would remove and read a yes/no answer.
    pub fn confirm_clean<I: BufRead, W: Write>(
        &self,
        stage: Option<&str>,
        input: &mut I,
        output: &mut W,
    ) -> Result<bool, SimflowError> {
        let stages = selected_stages(&self.project, stage)?;

        writeln!(output, "You are requesting to clean the following stages:").map_err(io)?;
        for s in &stages {
            writeln!(output, "  {}", s.name()).map_err(io)?;
        }
        if stage.is_none() {
            writeln!(output, "Additionally, this will delete:").map_err(io)?;
            writeln!(output, "  {}", self.project.work_dir().display()).map_err(io)?;
            writeln!(output, "  {}", self.project.top_dir().display()).map_err(io)?;
        }
        write!(
            output,
            "Please confirm this is the intended action (type \"y\"): "
        )
        .map_err(io)?;
        output.flush().map_err(io)?;

        let mut answer = String::new();
        input.read_line(&mut answer).map_err(io)?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }

    /// Delete a stage's files, registry records and directories, or those of
    /// every stage plus the project directories when `stage` is `None`.
    pub fn clean(&mut self, stage: Option<&str>) -> Result<CleanSummary, SimflowError> {
        let stages = selected_stages(&self.project, stage)?;
        let mut summary = CleanSummary::default();
        let mut registry = self.registry.acquire()?;

        for s in &stages {
            for file in registry.list_files(s.output_dataset(), None)? {
                if remove_file(&file.path)? {
                    summary.files_deleted += 1;
                }
            }
            summary.records_dropped += registry.drop_dataset(s.output_dataset())?;

            for dir in [
                s.output_directory().to_path_buf(),
                self.project.stage_work_dir(s),
            ] {
                if remove_dir(&dir)? {
                    summary.directories_removed.push(dir);
                }
            }
            summary.stages.push(s.name().to_string());
            tracing::info!(stage = s.name(), "cleaned stage");
        }

        // The registry file lives in the work directory.
        drop(registry);

        if stage.is_none() {
            for dir in [
                self.project.work_dir(),
                self.project.top_dir().to_path_buf(),
            ] {
                if remove_dir(&dir)? {
                    summary.directories_removed.push(dir);
                }
            }
        }
        Ok(summary)
    }

    // =========================================================================
    // CHECK / STATUS / STATISTICS
    // =========================================================================

    /// Completion report and makeup count for one stage or all of them.
    ///
    /// The makeup count is also written to `makeup_jobs.txt` in each stage
    /// work directory.
    pub fn check(&mut self, stage: Option<&str>) -> Result<Vec<StageCheck>, SimflowError> {
        let registry = self.registry.acquire()?;
        let evaluator = CompletionEvaluator::new(&self.project, &registry);
        let mut checks = Vec::new();

        for s in selected_stages(&self.project, stage)? {
            let report = evaluator.report(s)?;
            let makeup_jobs = evaluator.makeup_job_count(s)?;

            let work_dir = self.project.stage_work_dir(s);
            create_dir(&work_dir)?;
            write_file(&work_dir.join(MAKEUP_FILE), &makeup_jobs.to_string())?;

            tracing::debug!(stage = s.name(), makeup_jobs, "checked stage");
            checks.push(StageCheck {
                report,
                makeup_jobs,
            });
        }
        Ok(checks)
    }

    /// Task states of the stage's last submitted job. Never touches the
    /// registry.
    pub async fn status(&self, stage_name: &str) -> Result<JobStatus, SimflowError> {
        let stage = self.project.stage(stage_name)?;
        let job_id = self.job_id(stage)?;
        let queue = self.scheduler.queue_status(&job_id).await?;

        Ok(JobStatus {
            stage: stage.name().to_string(),
            job_id,
            queue,
        })
    }

    /// Write the accounting report of the stage's last job to its work
    /// directory and return the file written.
    pub async fn statistics(&self, stage_name: &str) -> Result<PathBuf, SimflowError> {
        let stage = self.project.stage(stage_name)?;
        let job_id = self.job_id(stage)?;
        let report = self.scheduler.accounting(&job_id).await?;

        let path = self
            .project
            .stage_work_dir(stage)
            .join(format!("sacct_long_job_{job_id}.out"));
        write_file(&path, &report)?;
        Ok(path)
    }

    /// Job id persisted by the last successful submit.
    pub fn job_id(&self, stage: &StageConfig) -> Result<String, SimflowError> {
        let path = self.project.stage_work_dir(stage).join(JOB_ID_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SimflowError::IoError(format!(
                "No job recorded for stage {} ({}): {}",
                stage.name(),
                path.display(),
                e
            ))
        })?;
        content
            .split_whitespace()
            .last()
            .map(str::to_string)
            .ok_or_else(|| SimflowError::IoError(format!("{} is empty", path.display())))
    }

    // =========================================================================
    // JOB-SIDE FILE HAND-OFF
    // =========================================================================

    /// Record a file produced by a job of `stage`.
    pub fn declare_file(
        &mut self,
        stage_name: &str,
        path: &Path,
        file_type: FileType,
        nevents: Option<u64>,
    ) -> Result<FileId, SimflowError> {
        let stage = self.project.stage(stage_name)?;
        let mut registry = self.registry.acquire()?;
        registry.create_dataset(stage.output_dataset(), self.project.input_dataset(stage))?;
        let id = registry.declare_file(stage.output_dataset(), path, file_type, nevents)?;
        tracing::info!(stage = stage.name(), file = %id, path = %path.display(), "declared file");
        Ok(id)
    }

    /// Correct the event count of a declared file.
    pub fn set_events(&mut self, file: FileId, nevents: u64) -> Result<(), SimflowError> {
        self.registry.acquire()?.set_nevents(file, nevents)
    }

    /// Claim input files for one job; `count` defaults to the stage's
    /// `n_files`.
    pub fn claim(
        &mut self,
        stage_name: &str,
        count: Option<usize>,
    ) -> Result<Vec<FileRecord>, SimflowError> {
        let stage = self.project.stage(stage_name)?;
        let count = count.unwrap_or(stage.files_per_job() as usize);
        let mut registry = self.registry.acquire()?;
        let files = ConsumptionTracker::new(&self.project, &mut registry).claim_files(stage, count)?;
        Ok(files)
    }

    /// Confirm that a job processed the given files.
    pub fn confirm(&mut self, stage_name: &str, files: &[FileId]) -> Result<(), SimflowError> {
        let stage = self.project.stage(stage_name)?;
        let mut registry = self.registry.acquire()?;
        ConsumptionTracker::new(&self.project, &mut registry).confirm_consumed_ids(stage, files)?;
        Ok(())
    }

    /// Return every unconfirmed claim of the stage to the pool.
    pub fn reset(&mut self, stage_name: &str) -> Result<usize, SimflowError> {
        let stage = self.project.stage(stage_name)?;
        let mut registry = self.registry.acquire()?;
        let reset = ConsumptionTracker::new(&self.project, &mut registry).reset_yielded(stage)?;
        Ok(reset)
    }
}

fn selected_stages<'p>(
    project: &'p ProjectConfig,
    stage: Option<&str>,
) -> Result<Vec<&'p StageConfig>, SimflowError> {
    match stage {
        Some(name) => Ok(vec![project.stage(name)?]),
        None => Ok(project.stages().collect()),
    }
}

// =============================================================================
// BATCH SCRIPT
// =============================================================================

/// `<project>.<stage>`, the scheduler job name.
#[must_use]
pub fn job_name(project: &ProjectConfig, stage: &StageConfig) -> String {
    format!("{}.{}", project.name(), stage.name())
}

/// Batch script run by every array task of a stage.
#[must_use]
pub fn render_script(project: &ProjectConfig, stage: &StageConfig, config_path: &Path) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/bash\n");
    script.push_str(&format!("#SBATCH --job-name={}\n", job_name(project, stage)));
    script.push_str("#SBATCH --ntasks=1\n");
    if let Some(partition) = &project.scheduler().partition {
        script.push_str(&format!("#SBATCH -p {partition}\n"));
    }
    script.push_str(&format!("#SBATCH --mem={}mb\n", stage.memory_mb()));
    script.push_str(&format!("#SBATCH --time={}\n", stage.wall_time()));
    script.push_str("#SBATCH --output=array_%A-%a.log\n");
    script.push('\n');
    script.push_str("pwd; hostname; date;\n");
    script.push_str("whoami;\n");
    script.push('\n');

    let input = stage.input();
    let output = stage.output();
    let mut exports = vec![
        ("SIMFLOW_STAGE", stage.name().to_string()),
        ("SIMFLOW_FCL", stage.fcl().to_string()),
        ("SIMFLOW_OUTPUT_TYPE", output.kind.clone()),
        ("SIMFLOW_OUTPUT_DIR", output.location.display().to_string()),
    ];
    if input.from_dataset {
        exports.push(("SIMFLOW_INPUT_LOCATION", input.location.clone()));
        exports.push(("SIMFLOW_FILES_PER_JOB", input.n_files.to_string()));
    }
    for (key, value) in exports {
        script.push_str(&format!("export {key}={}\n", shell_quote(&value)));
    }
    script.push('\n');
    script.push_str(&format!(
        "{} {} {}\n",
        project.job_command(),
        config_path.display(),
        stage.name()
    ));
    script.push_str("date;\n");
    script
}

/// Single-quote a value for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

// =============================================================================
// FILESYSTEM HELPERS
// =============================================================================

fn io(e: std::io::Error) -> SimflowError {
    SimflowError::IoError(e.to_string())
}

fn create_dir(path: &Path) -> Result<(), SimflowError> {
    std::fs::create_dir_all(path)
        .map_err(|e| SimflowError::IoError(format!("Cannot create {}: {}", path.display(), e)))
}

fn is_empty_dir(path: &Path) -> Result<bool, SimflowError> {
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| SimflowError::IoError(format!("Cannot read {}: {}", path.display(), e)))?;
    Ok(entries.next().is_none())
}

fn write_file(path: &Path, content: &str) -> Result<(), SimflowError> {
    std::fs::write(path, content)
        .map_err(|e| SimflowError::IoError(format!("Cannot write {}: {}", path.display(), e)))
}

/// Remove a file; `false` when it was already gone.
fn remove_file(path: &Path) -> Result<bool, SimflowError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SimflowError::IoError(format!(
            "Cannot remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Remove a directory tree; `false` when it did not exist.
fn remove_dir(path: &Path) -> Result<bool, SimflowError> {
    if !path.is_dir() {
        return Ok(false);
    }
    std::fs::remove_dir_all(path)
        .map(|()| true)
        .map_err(|e| SimflowError::IoError(format!("Cannot remove {}: {}", path.display(), e)))
}

// =============================================================================
// TESTS
// =============================================================================
