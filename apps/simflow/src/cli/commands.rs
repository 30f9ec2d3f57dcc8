//! # CLI Command Implementations
//!
//! Each command prints either a short human-readable summary or, with
//! `--json-mode`, one pretty-printed JSON document on stdout. Prompts go to
//! stderr so they never mix with that document.
//!
//! The registry file is only opened by the commands that read or write it,
//! and only for as long as they need it.

use crate::orchestrator::{CleanSummary, StageCheck, StageOrchestrator};
use crate::scheduler::{Scheduler, SlurmScheduler};
use serde::Serialize;
use simflow_core::{
    FileId, FileType, ProjectConfig, RedbSource, RegistrySource, SimflowError, Target,
};
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

/// How long a command waits for another process to release the registry.
const REGISTRY_PATIENCE: Duration = Duration::from_secs(30);

/// The orchestrator wired to the on-disk registry and SLURM.
pub type ProjectOrchestrator = StageOrchestrator<RedbSource, SlurmScheduler>;

/// Load the project file and point the orchestrator at its registry. The
/// registry itself is opened per operation.
pub fn open_orchestrator(config: &Path) -> Result<ProjectOrchestrator, SimflowError> {
    let project = ProjectConfig::load(config)?;
    let config_path = config.canonicalize().map_err(|e| {
        SimflowError::IoError(format!("Cannot resolve {}: {}", config.display(), e))
    })?;

    let work_dir = project.work_dir();
    std::fs::create_dir_all(&work_dir).map_err(|e| {
        SimflowError::IoError(format!("Cannot create {}: {}", work_dir.display(), e))
    })?;
    let registry = RedbSource::new(project.database_path(), REGISTRY_PATIENCE);
    let scheduler = SlurmScheduler::new(project.scheduler());

    tracing::debug!(project = project.name(), config = %config_path.display(), "loaded project");
    Ok(StageOrchestrator::new(project, config_path, registry, scheduler))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SimflowError> {
    write_json(&mut std::io::stdout(), value)
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), SimflowError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| SimflowError::SerializationError(e.to_string()))?;
    writeln!(out, "{text}").map_err(|e| SimflowError::IoError(e.to_string()))
}

// =============================================================================
// PROJECT COMMANDS
// =============================================================================

/// Submit a stage.
pub async fn cmd_submit(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
) -> Result<(), SimflowError> {
    let summary = orchestrator.submit(stage).await?;

    if json_mode {
        return print_json(&summary);
    }
    println!(
        "Submitted {} tasks for stage {} as job {}",
        summary.n_tasks, summary.stage, summary.job_id
    );
    println!("Script: {}", summary.script.display());
    Ok(())
}

/// Clean one stage or the whole project, after confirmation.
pub fn cmd_clean(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: Option<&str>,
    yes: bool,
) -> Result<(), SimflowError> {
    let stdin = std::io::stdin();
    clean_with_prompt(
        orchestrator,
        json_mode,
        stage,
        yes,
        &mut stdin.lock(),
        &mut std::io::stderr(),
        &mut std::io::stdout(),
    )
}

/// `clean` with explicit streams: the question is written to `prompt`,
/// the answer read from `input`, the result written to `out`.
pub fn clean_with_prompt<R, S, I, P, O>(
    orchestrator: &mut StageOrchestrator<R, S>,
    json_mode: bool,
    stage: Option<&str>,
    yes: bool,
    input: &mut I,
    prompt: &mut P,
    out: &mut O,
) -> Result<(), SimflowError>
where
    R: RegistrySource,
    S: Scheduler,
    I: BufRead,
    P: Write,
    O: Write,
{
    let summary = if yes || orchestrator.confirm_clean(stage, input, prompt)? {
        orchestrator.clean(stage)?
    } else {
        CleanSummary::default()
    };

    if json_mode {
        return write_json(out, &summary);
    }
    write_clean_summary(out, &summary).map_err(|e| SimflowError::IoError(e.to_string()))
}

fn write_clean_summary<O: Write>(out: &mut O, summary: &CleanSummary) -> std::io::Result<()> {
    if summary.stages.is_empty() {
        return writeln!(out, "Nothing cleaned.");
    }
    writeln!(out, "Cleaned stages: {}", summary.stages.join(", "))?;
    writeln!(out, "Files deleted:   {}", summary.files_deleted)?;
    writeln!(out, "Records dropped: {}", summary.records_dropped)?;
    for dir in &summary.directories_removed {
        writeln!(out, "Removed {}", dir.display())?;
    }
    Ok(())
}

/// Print completion reports and makeup counts.
pub fn cmd_check(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: Option<&str>,
) -> Result<(), SimflowError> {
    let checks = orchestrator.check(stage)?;

    if json_mode {
        return print_json(&checks);
    }
    for check in &checks {
        print_check(check);
    }
    println!("Submission of makeup jobs is not implemented.");
    Ok(())
}

fn print_check(check: &StageCheck) {
    let report = &check.report;
    println!("Stage {}", report.stage);
    println!("{}", "=".repeat(report.stage.len() + 6));

    for (label, progress) in [("Output", &report.output), ("Analysis", &report.analysis)] {
        let events = progress
            .produced
            .events
            .map_or_else(|| "unknown".to_string(), |e| e.to_string());
        println!(
            "{label:<9} {} files, {events} events (target {})",
            progress.produced.file_count, progress.target
        );
    }

    if let Some(counts) = &report.consumption {
        println!(
            "Input     {} unyielded, {} yielded, {} consumed",
            counts.unyielded, counts.yielded, counts.consumed
        );
    }

    let active = if report.analysis.target == Target::Events(0) {
        report.output.target
    } else {
        report.analysis.target
    };
    if check.makeup_jobs > 0 {
        println!(
            "Incomplete: {} makeup jobs needed (target {active})",
            check.makeup_jobs
        );
    } else {
        println!("Complete");
    }
    println!();
}

/// Print scheduler state counts for a stage's job.
pub async fn cmd_status(
    orchestrator: &ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
) -> Result<(), SimflowError> {
    let status = orchestrator.status(stage).await?;

    if json_mode {
        return print_json(&status);
    }
    println!("Condensed information for job {}:", status.job_id);
    if status.queue.is_empty() {
        println!("  No tasks in the queue");
    }
    for (state, count) in &status.queue.states {
        println!("  {count} jobs in state {state}");
    }
    Ok(())
}

/// Save the accounting report for a stage's job.
pub async fn cmd_statistics(
    orchestrator: &ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
) -> Result<(), SimflowError> {
    let path = orchestrator.statistics(stage).await?;

    if json_mode {
        return print_json(&serde_json::json!({ "stage": stage, "path": path }));
    }
    println!("Accounting report written to {}", path.display());
    Ok(())
}

// =============================================================================
// JOB COMMANDS
// =============================================================================

/// Record a produced file and print its identifier.
pub fn cmd_declare(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
    path: &Path,
    file_type: FileType,
    nevents: Option<u64>,
) -> Result<(), SimflowError> {
    let id = orchestrator.declare_file(stage, path, file_type, nevents)?;

    if json_mode {
        return print_json(&serde_json::json!({ "id": id, "stage": stage }));
    }
    println!("{id}");
    Ok(())
}

/// Correct a file's event count.
pub fn cmd_set_events(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    id: u64,
    nevents: u64,
) -> Result<(), SimflowError> {
    orchestrator.set_events(FileId(id), nevents)?;

    if json_mode {
        return print_json(&serde_json::json!({ "id": id, "nevents": nevents }));
    }
    Ok(())
}

/// Claim input files; text mode prints `<id> <path>` per line.
pub fn cmd_claim(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
    count: Option<usize>,
) -> Result<(), SimflowError> {
    let files = orchestrator.claim(stage, count)?;

    if json_mode {
        return print_json(&files);
    }
    for file in &files {
        println!("{} {}", file.id, file.path.display());
    }
    Ok(())
}

/// Confirm claimed files.
pub fn cmd_confirm(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
    ids: &[u64],
) -> Result<(), SimflowError> {
    let ids: Vec<FileId> = ids.iter().copied().map(FileId).collect();
    orchestrator.confirm(stage, &ids)?;

    if json_mode {
        return print_json(&serde_json::json!({ "stage": stage, "confirmed": ids.len() }));
    }
    Ok(())
}

/// Release unconfirmed claims.
pub fn cmd_reset(
    orchestrator: &mut ProjectOrchestrator,
    json_mode: bool,
    stage: &str,
) -> Result<(), SimflowError> {
    let reset = orchestrator.reset(stage)?;

    if json_mode {
        return print_json(&serde_json::json!({ "stage": stage, "reset": reset }));
    }
    println!("Released {reset} files for stage {stage}");
    Ok(())
}
