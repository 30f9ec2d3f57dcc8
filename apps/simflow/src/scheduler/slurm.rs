//! # SLURM Scheduler
//!
//! `sbatch` for submission, `squeue` for live task states, `sacct` for
//! accounting. Output parsing is kept in free functions so it can be tested
//! without a cluster.

use super::process::{display_command, run_command};
use super::{ArrayRequest, QueueSummary, Scheduler, Submission};
use simflow_core::{SchedulerSettings, SimflowError};
use std::time::Duration;

/// Column layout requested from `squeue`.
const SQUEUE_FORMAT: &str = "--format=%.25i %.9P %.8j %.8u %.8T %.10M %.9l %.6D %R";

/// Fields requested from `sacct`.
const SACCT_FIELDS: [&str; 14] = [
    "jobid%20",
    "jobname%50",
    "partition%30",
    "account%20",
    "maxvmsize",
    "avevmsize",
    "maxrss",
    "reqmem",
    "averss",
    "avecpu",
    "avecpufreq",
    "elapsed",
    "state",
    "exitcode",
];

/// Runs SLURM's command-line tools.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    timeout: Duration,
}

impl SlurmScheduler {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.command_timeout_secs),
        }
    }

    fn sbatch_args(request: &ArrayRequest) -> Vec<String> {
        vec![
            "-a".to_string(),
            format!(
                "0-{}%{}",
                request.n_tasks.saturating_sub(1),
                request.concurrency
            ),
            request.script.display().to_string(),
        ]
    }
}

impl Scheduler for SlurmScheduler {
    async fn submit_array(&self, request: &ArrayRequest) -> Result<Submission, SimflowError> {
        let args = Self::sbatch_args(request);
        let command = display_command("sbatch", &args);

        let output = run_command("sbatch", &args, Some(&request.work_dir), self.timeout).await?;
        let job_id = if output.success() {
            parse_job_id(&output.stdout)
        } else {
            None
        };

        Ok(Submission {
            command,
            output,
            job_id,
        })
    }

    async fn queue_status(&self, job_id: &str) -> Result<QueueSummary, SimflowError> {
        let args = vec![
            SQUEUE_FORMAT.to_string(),
            "-j".to_string(),
            job_id.to_string(),
        ];
        let output = run_command("squeue", &args, None, self.timeout).await?;
        let stdout = output.into_stdout(&display_command("squeue", &args))?;
        parse_queue(&stdout)
    }

    async fn accounting(&self, job_id: &str) -> Result<String, SimflowError> {
        let args = vec![
            format!("--format={}", SACCT_FIELDS.join(",")),
            "-j".to_string(),
            job_id.to_string(),
        ];
        let output = run_command("sacct", &args, None, self.timeout).await?;
        output.into_stdout(&display_command("sacct", &args))
    }
}

// =============================================================================
// OUTPUT PARSING
// =============================================================================

/// Job id from `sbatch` output (`Submitted batch job 12345`).
#[must_use]
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let token = stdout.split_whitespace().last()?;
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Task counts by state from `squeue` output.
///
/// The header row locates the `JOBID` and `STATE` columns. Pending array
/// rows such as `123_[3-9%5]` stand for several tasks and are expanded to
/// their task count. Output with no job rows is an empty summary.
pub fn parse_queue(stdout: &str) -> Result<QueueSummary, SimflowError> {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(QueueSummary::default());
    };

    let columns: Vec<&str> = header.split_whitespace().collect();
    let column = |name: &str| {
        columns.iter().position(|c| *c == name).ok_or_else(|| {
            SimflowError::SerializationError(format!("squeue output has no {name} column"))
        })
    };
    let job_col = column("JOBID")?;
    let state_col = column("STATE")?;

    let mut summary = QueueSummary::default();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(job), Some(state)) = (fields.get(job_col), fields.get(state_col)) else {
            continue;
        };
        let tasks = array_task_count(job)?;
        let entry = summary.states.entry((*state).to_string()).or_insert(0);
        *entry = entry.saturating_add(tasks);
    }
    Ok(summary)
}

/// Number of tasks one `squeue` job id stands for.
fn array_task_count(job: &str) -> Result<u64, SimflowError> {
    let Some((_, tasks)) = job.split_once('_') else {
        return Ok(1);
    };
    let Some(inner) = tasks.strip_prefix('[') else {
        return Ok(1);
    };
    let inner = inner.trim_end_matches(']');
    let inner = inner.split('%').next().unwrap_or(inner);

    let mut total = 0u64;
    for part in inner.split(',').filter(|p| !p.is_empty()) {
        let count = match part.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_index(lo, job)?;
                let hi = parse_index(hi, job)?;
                hi.checked_sub(lo).map_or(0, |d| d.saturating_add(1))
            }
            None => {
                parse_index(part, job)?;
                1
            }
        };
        total = total.saturating_add(count);
    }
    Ok(total)
}

fn parse_index(value: &str, job: &str) -> Result<u64, SimflowError> {
    value.trim().parse::<u64>().map_err(|_| {
        SimflowError::SerializationError(format!("Unrecognised array task range in {job}"))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const HEADER: &str =
        "                    JOBID PARTITION     NAME     USER    STATE       TIME TIME_LIMI  NODES NODELIST(REASON)";

    #[test]
    fn job_id_is_last_token() {
        assert_eq!(
            parse_job_id("Submitted batch job 4242\n"),
            Some("4242".to_string())
        );
        assert_eq!(parse_job_id("sbatch: error: invalid partition"), None);
        assert_eq!(parse_job_id(""), None);
    }

    #[test]
    fn array_range_uses_zero_based_tasks() {
        let request = ArrayRequest {
            script: PathBuf::from("/work/gen/nue.gen_submission_script.slurm"),
            work_dir: PathBuf::from("/work/gen"),
            n_tasks: 10,
            concurrency: 4,
        };
        assert_eq!(
            SlurmScheduler::sbatch_args(&request),
            vec![
                "-a".to_string(),
                "0-9%4".to_string(),
                "/work/gen/nue.gen_submission_script.slurm".to_string()
            ]
        );
    }

    #[test]
    fn empty_queue() {
        assert!(parse_queue("").expect("parse").is_empty());
        assert!(parse_queue(&format!("{HEADER}\n")).expect("parse").is_empty());
    }

    #[test]
    fn counts_running_and_expands_pending_ranges() {
        let stdout = format!(
            "{HEADER}\n\
             \x20        4242_[3-9%5]  guenette nue.gen   alice  PENDING       0:00   1:00:00      1 (JobArrayTaskLimit)\n\
             \x20              4242_0  guenette nue.gen   alice  RUNNING       2:10   1:00:00      1 node01\n\
             \x20              4242_1  guenette nue.gen   alice  RUNNING       2:10   1:00:00      1 node02\n\
             \x20              4242_2  guenette nue.gen   alice COMPLETING     2:11   1:00:00      1 node03\n"
        );
        let summary = parse_queue(&stdout).expect("parse");

        assert_eq!(summary.states.get("PENDING"), Some(&7));
        assert_eq!(summary.states.get("RUNNING"), Some(&2));
        assert_eq!(summary.states.get("COMPLETING"), Some(&1));
        assert_eq!(summary.total(), 10);
    }

    #[test]
    fn comma_separated_pending_tasks() {
        assert_eq!(array_task_count("77_[1,4-6,9]").expect("count"), 5);
        assert_eq!(array_task_count("77_5").expect("count"), 1);
        assert_eq!(array_task_count("77").expect("count"), 1);
    }

    #[test]
    fn malformed_range_is_rejected() {
        assert!(array_task_count("77_[a-b]").is_err());
        assert!(parse_queue("JOBID NAME\n1 x\n").is_err());
    }
}
