//! # Project Configuration
//!
//! The ordered pipeline of stages plus project-wide settings, loaded once
//! from a TOML file.
//!
//! ```toml
//! name = "nue_sample"
//! top_dir = "/scratch/nue_sample"
//!
//! [scheduler]
//! partition = "guenette"
//! concurrent_jobs = 50
//!
//! [[stages]]
//! name = "generation"
//! fcl = "prodgenie.fcl"
//! n_jobs = 10
//! events_per_job = 1000
//! input = { type = "none", location = "none" }
//! output = { type = "larsoft", location = "/scratch/nue_sample/gen" }
//! ```
//!
//! Stages link to their upstream stage by name only. A stage with input
//! uses its `previous_stage` key, or else the stage declared just before it.

use crate::SimflowError;
use crate::config::StageConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

/// Command written into batch scripts when `job_command` is not set.
pub const DEFAULT_JOB_COMMAND: &str = "simflow-job";

// =============================================================================
// SCHEDULER SETTINGS
// =============================================================================

/// Project-wide scheduler options (`[scheduler]` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    /// Partition to submit to; omitted from scripts when unset.
    pub partition: Option<String>,
    /// Default cap on simultaneously running array tasks.
    pub concurrent_jobs: u32,
    /// Upper bound on how long a scheduler command may run.
    pub command_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            partition: None,
            concurrent_jobs: 100,
            command_timeout_secs: 60,
        }
    }
}

// =============================================================================
// PROJECT CONFIG
// =============================================================================

/// A whole project: settings plus stages in declaration order.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    name: String,
    top_dir: PathBuf,
    job_command: String,
    scheduler: SchedulerSettings,
    stages: Vec<StageConfig>,
    /// Stage name -> position in `stages`.
    index: BTreeMap<String, usize>,
}

impl ProjectConfig {
    /// Read and validate a project file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimflowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimflowError::IoError(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate a project from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SimflowError> {
        let root: Table = toml::from_str(content)
            .map_err(|e| SimflowError::InvalidConfig(format!("Failed to parse TOML: {e}")))?;
        Self::from_table(&root)
    }

    /// Validate a project from an already-parsed table.
    pub fn from_table(root: &Table) -> Result<Self, SimflowError> {
        let name = top_level_string(root, "name")?;
        let top_dir = PathBuf::from(top_level_string(root, "top_dir")?);
        let job_command = match root.get("job_command") {
            Some(_) => top_level_string(root, "job_command")?,
            None => DEFAULT_JOB_COMMAND.to_string(),
        };

        let scheduler = match root.get("scheduler") {
            Some(value) => value.clone().try_into::<SchedulerSettings>().map_err(|e| {
                SimflowError::InvalidConfig(format!("Invalid [scheduler] table: {e}"))
            })?,
            None => SchedulerSettings::default(),
        };
        if scheduler.concurrent_jobs == 0 {
            return Err(SimflowError::InvalidConfig(
                "scheduler.concurrent_jobs must be at least 1".to_string(),
            ));
        }

        let raw_stages = root
            .get("stages")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SimflowError::InvalidConfig("Project defines no [[stages]] array".to_string())
            })?;

        let mut stages = Vec::with_capacity(raw_stages.len());
        let mut index = BTreeMap::new();

        for (position, raw) in raw_stages.iter().enumerate() {
            let table = raw.as_table().ok_or_else(|| {
                SimflowError::InvalidConfig(format!("Stage #{position} is not a table"))
            })?;
            let stage_name = match table.get("name") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(_) => {
                    return Err(SimflowError::InvalidConfig(format!(
                        "Stage #{position} name must be a non-empty string"
                    )));
                }
                None => return Err(SimflowError::missing("name", format!("#{position}"))),
            };
            if index.contains_key(&stage_name) {
                return Err(SimflowError::InvalidConfig(format!(
                    "Duplicate stage name {stage_name}"
                )));
            }

            let previous = resolve_previous(table, &stage_name, &stages, &index)?;
            let stage = StageConfig::from_table(&stage_name, table, previous)?;

            index.insert(stage_name, position);
            stages.push(stage);
        }

        Ok(Self {
            name,
            top_dir,
            job_command,
            scheduler,
            stages,
            index,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn top_dir(&self) -> &Path {
        &self.top_dir
    }

    /// Command each array task runs, followed by the config path and stage.
    #[must_use]
    pub fn job_command(&self) -> &str {
        &self.job_command
    }

    #[must_use]
    pub fn scheduler(&self) -> &SchedulerSettings {
        &self.scheduler
    }

    /// Project work directory (`top_dir/work`).
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.top_dir.join("work")
    }

    /// Work directory of one stage (`top_dir/work/<stage>`).
    #[must_use]
    pub fn stage_work_dir(&self, stage: &StageConfig) -> PathBuf {
        self.work_dir().join(stage.name())
    }

    /// Location of the project's registry database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.work_dir().join(format!("{}.redb", self.name))
    }

    /// Stages in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &StageConfig> {
        self.stages.iter()
    }

    /// Look a stage up by name.
    pub fn stage(&self, name: &str) -> Result<&StageConfig, SimflowError> {
        self.index
            .get(name)
            .and_then(|&i| self.stages.get(i))
            .ok_or_else(|| SimflowError::StageNotFound(name.to_string()))
    }

    /// Resolve a stage's upstream link.
    #[must_use]
    pub fn previous_stage(&self, stage: &StageConfig) -> Option<&StageConfig> {
        stage
            .previous_stage()
            .and_then(|name| self.index.get(name))
            .and_then(|&i| self.stages.get(i))
    }

    /// Dataset a stage reads from, if it has input and an upstream stage.
    #[must_use]
    pub fn input_dataset(&self, stage: &StageConfig) -> Option<&str> {
        if !stage.has_input() {
            return None;
        }
        self.previous_stage(stage).map(StageConfig::output_dataset)
    }
}

fn top_level_string(root: &Table, key: &str) -> Result<String, SimflowError> {
    match root.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(SimflowError::InvalidConfig(format!(
            "Top-level {key} must be a string"
        ))),
        None => Err(SimflowError::InvalidConfig(format!(
            "Missing top-level keyword {key}"
        ))),
    }
}

/// Work out the upstream stage name for a stage still being parsed.
///
/// Only stages declared earlier are eligible, so links always point
/// backwards and the chain stays acyclic.
fn resolve_previous(
    table: &Table,
    stage_name: &str,
    earlier: &[StageConfig],
    index: &BTreeMap<String, usize>,
) -> Result<Option<String>, SimflowError> {
    let has_input = table
        .get("input")
        .and_then(Value::as_table)
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        .is_some_and(|t| t != "none");

    match table.get("previous_stage") {
        Some(Value::String(prev)) => {
            if !index.contains_key(prev) {
                return Err(SimflowError::InvalidConfig(format!(
                    "Stage {stage_name} names previous_stage {prev}, \
                     which is not declared before it"
                )));
            }
            Ok(Some(prev.clone()))
        }
        Some(_) => Err(SimflowError::InvalidConfig(format!(
            "{stage_name}/previous_stage must be a string"
        ))),
        None if has_input => Ok(earlier.last().map(|s| s.name().to_string())),
        None => Ok(None),
    }
}

// =============================================================================
// TESTS
// =============================================================================
