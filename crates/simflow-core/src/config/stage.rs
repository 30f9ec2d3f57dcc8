//! # Stage Configuration
//!
//! A validated, read-only view of one stage of the pipeline.
//!
//! Stages are built from the raw key/value table of the project file.
//! Every required key is checked once, here; accessors never fail.

use crate::SimflowError;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

// =============================================================================
// REQUIRED KEYS
// =============================================================================

/// Keys every stage must define, checked in this order.
pub const REQUIRED_KEYS: [&str; 5] = ["fcl", "n_jobs", "events_per_job", "input", "output"];

/// Subkeys required inside the `input` and `output` tables.
pub const REQUIRED_SUBKEYS: [&str; 2] = ["type", "location"];

/// Memory request used when a stage does not set `memory`.
pub const DEFAULT_MEMORY_MB: u32 = 2000;

/// Wall time used when a stage does not set `time`.
pub const DEFAULT_WALL_TIME: &str = "01:00:00";

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Where a stage's input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    /// True for `type = "dataset"`, false for `type = "none"`.
    pub from_dataset: bool,
    /// Declared input location (informational for dataset inputs).
    pub location: String,
    /// Files handed to each job.
    pub n_files: u32,
}

/// Where and what a stage writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Output type label (free-form, e.g. the framework name).
    pub kind: String,
    /// Output directory.
    pub location: PathBuf,
    /// Only analysis files are produced.
    pub anaonly: bool,
}

// =============================================================================
// STAGE CONFIG
// =============================================================================

/// One stage of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    name: String,
    fcl: String,
    n_jobs: u32,
    events_per_job: Option<u64>,
    input: InputDescriptor,
    output: OutputDescriptor,
    memory_mb: u32,
    wall_time: String,
    concurrent_jobs: Option<u32>,
    previous_stage: Option<String>,
}

impl StageConfig {
    /// Validate a raw stage table.
    ///
    /// `previous_stage` is the *name* of the upstream stage, resolved
    /// through the project's stage mapping when needed.
    ///
    /// # Errors
    ///
    /// `SimflowError::Config` naming the first missing key (or
    /// `name/key` qualified subkey), or `SimflowError::InvalidConfig` for
    /// values of the wrong type or range.
    pub fn from_table(
        name: &str,
        table: &Table,
        previous_stage: Option<String>,
    ) -> Result<Self, SimflowError> {
        for key in REQUIRED_KEYS {
            let value = table
                .get(key)
                .ok_or_else(|| SimflowError::missing(key, name))?;

            if key == "input" || key == "output" {
                let sub = value.as_table().ok_or_else(|| {
                    SimflowError::InvalidConfig(format!("{name}/{key} must be a table"))
                })?;
                for subkey in REQUIRED_SUBKEYS {
                    if !sub.contains_key(subkey) {
                        return Err(SimflowError::missing(subkey, format!("{name}/{key}")));
                    }
                }
            }
        }

        let fcl = string_at(table, "fcl", name)?;

        let n_jobs = integer_at(table, "n_jobs", name)?;
        if n_jobs < 1 {
            return Err(SimflowError::InvalidConfig(format!(
                "{name}/n_jobs must be at least 1, got {n_jobs}"
            )));
        }

        let events_per_job = match integer_at(table, "events_per_job", name)? {
            -1 => None,
            n if n >= 1 => Some(n as u64),
            n => {
                return Err(SimflowError::InvalidConfig(format!(
                    "{name}/events_per_job must be -1 or positive, got {n}"
                )));
            }
        };

        let input = parse_input(table, name)?;
        let output = parse_output(table, name)?;

        let memory_mb = match table.get("memory") {
            Some(_) => positive_u32(table, "memory", name)?,
            None => DEFAULT_MEMORY_MB,
        };
        let wall_time = match table.get("time") {
            Some(_) => string_at(table, "time", name)?,
            None => DEFAULT_WALL_TIME.to_string(),
        };
        let concurrent_jobs = match table.get("concurrent_jobs") {
            Some(_) => Some(positive_u32(table, "concurrent_jobs", name)?),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            fcl,
            n_jobs: n_jobs as u32,
            events_per_job,
            input,
            output,
            memory_mb,
            wall_time,
            concurrent_jobs,
            previous_stage,
        })
    }

    /// Stage name, unique within the project.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Framework configuration file run by each job.
    #[must_use]
    pub fn fcl(&self) -> &str {
        &self.fcl
    }

    /// Whether the stage reads another stage's output.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.input.from_dataset
    }

    /// Number of array tasks submitted for this stage.
    #[must_use]
    pub fn n_jobs(&self) -> u32 {
        self.n_jobs
    }

    /// Events each job should produce; `None` means unbounded.
    #[must_use]
    pub fn events_per_job(&self) -> Option<u64> {
        self.events_per_job
    }

    /// Input files handed to each job.
    #[must_use]
    pub fn files_per_job(&self) -> u32 {
        self.input.n_files
    }

    #[must_use]
    pub fn output_directory(&self) -> &Path {
        &self.output.location
    }

    #[must_use]
    pub fn is_analysis_only(&self) -> bool {
        self.output.anaonly
    }

    #[must_use]
    pub fn input(&self) -> &InputDescriptor {
        &self.input
    }

    #[must_use]
    pub fn output(&self) -> &OutputDescriptor {
        &self.output
    }

    /// Memory request per job, in megabytes.
    #[must_use]
    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }

    /// Wall-time request per job (`HH:MM:SS`).
    #[must_use]
    pub fn wall_time(&self) -> &str {
        &self.wall_time
    }

    /// Per-stage cap on simultaneously running array tasks.
    #[must_use]
    pub fn concurrent_jobs(&self) -> Option<u32> {
        self.concurrent_jobs
    }

    /// Name of the upstream stage, if linked.
    #[must_use]
    pub fn previous_stage(&self) -> Option<&str> {
        self.previous_stage.as_deref()
    }

    /// Dataset holding this stage's output.
    #[must_use]
    pub fn output_dataset(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

fn parse_input(table: &Table, name: &str) -> Result<InputDescriptor, SimflowError> {
    let ctx = format!("{name}/input");
    let input = sub_table(table, "input", name)?;

    let from_dataset = match string_at(input, "type", &ctx)?.as_str() {
        "none" => false,
        "dataset" => true,
        other => {
            return Err(SimflowError::InvalidConfig(format!(
                "{ctx}/type must be \"none\" or \"dataset\", got \"{other}\""
            )));
        }
    };
    let location = string_at(input, "location", &ctx)?;
    let n_files = match input.get("n_files") {
        Some(_) => positive_u32(input, "n_files", &ctx)?,
        None => 1,
    };

    Ok(InputDescriptor {
        from_dataset,
        location,
        n_files,
    })
}

fn parse_output(table: &Table, name: &str) -> Result<OutputDescriptor, SimflowError> {
    let ctx = format!("{name}/output");
    let output = sub_table(table, "output", name)?;

    let kind = string_at(output, "type", &ctx)?;
    let location = PathBuf::from(string_at(output, "location", &ctx)?);
    let anaonly = match output.get("anaonly") {
        None => false,
        Some(Value::Boolean(b)) => *b,
        Some(_) => {
            return Err(SimflowError::InvalidConfig(format!(
                "{ctx}/anaonly must be a boolean"
            )));
        }
    };

    Ok(OutputDescriptor {
        kind,
        location,
        anaonly,
    })
}

fn sub_table<'t>(table: &'t Table, key: &str, ctx: &str) -> Result<&'t Table, SimflowError> {
    table
        .get(key)
        .and_then(Value::as_table)
        .ok_or_else(|| SimflowError::InvalidConfig(format!("{ctx}/{key} must be a table")))
}

fn string_at(table: &Table, key: &str, ctx: &str) -> Result<String, SimflowError> {
    match table.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(SimflowError::InvalidConfig(format!(
            "{ctx}/{key} must be a string"
        ))),
        None => Err(SimflowError::missing(key, ctx)),
    }
}

/// Integers may be written bare or quoted.
fn integer_at(table: &Table, key: &str, ctx: &str) -> Result<i64, SimflowError> {
    match table.get(key) {
        Some(Value::Integer(n)) => Ok(*n),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| {
            SimflowError::InvalidConfig(format!("{ctx}/{key} must be an integer, got \"{s}\""))
        }),
        Some(_) => Err(SimflowError::InvalidConfig(format!(
            "{ctx}/{key} must be an integer"
        ))),
        None => Err(SimflowError::missing(key, ctx)),
    }
}

fn positive_u32(table: &Table, key: &str, ctx: &str) -> Result<u32, SimflowError> {
    let n = integer_at(table, key, ctx)?;
    u32::try_from(n)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| {
            SimflowError::InvalidConfig(format!("{ctx}/{key} must be a positive integer, got {n}"))
        })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn stage_table(src: &str) -> Table {
        toml::from_str(src).expect("valid toml")
    }

    const GENERATION: &str = r#"
        fcl = "prodsingle.fcl"
        n_jobs = 10
        events_per_job = 1000
        [input]
        type = "none"
        location = "none"
        [output]
        type = "larsoft"
        location = "/data/gen"
    "#;

    #[test]
    fn parses_complete_stage() {
        let stage = StageConfig::from_table("gen", &stage_table(GENERATION), None)
            .expect("valid stage");

        assert_eq!(stage.name(), "gen");
        assert_eq!(stage.fcl(), "prodsingle.fcl");
        assert_eq!(stage.n_jobs(), 10);
        assert_eq!(stage.events_per_job(), Some(1000));
        assert_eq!(stage.files_per_job(), 1);
        assert!(!stage.has_input());
        assert!(!stage.is_analysis_only());
        assert_eq!(stage.output_directory(), Path::new("/data/gen"));
        assert_eq!(stage.memory_mb(), DEFAULT_MEMORY_MB);
        assert_eq!(stage.wall_time(), DEFAULT_WALL_TIME);
        assert_eq!(stage.output_dataset(), "gen");
    }

    #[test]
    fn each_missing_key_is_named() {
        for key in REQUIRED_KEYS {
            let mut table = stage_table(GENERATION);
            table.remove(key);

            match StageConfig::from_table("gen", &table, None) {
                Err(SimflowError::Config { key: k, stage }) => {
                    assert_eq!(k, key);
                    assert_eq!(stage, "gen");
                }
                other => panic!("expected Config error for {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_subkey_is_qualified() {
        let table = stage_table(
            r#"
            fcl = "reco.fcl"
            n_jobs = 1
            events_per_job = -1
            [input]
            location = "somewhere"
            [output]
            type = "larsoft"
            location = "/data/reco"
        "#,
        );

        match StageConfig::from_table("reco", &table, None) {
            Err(SimflowError::Config { key, stage }) => {
                assert_eq!(key, "type");
                assert_eq!(stage, "reco/input");
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn minus_one_events_is_unbounded() {
        let mut table = stage_table(GENERATION);
        table.insert("events_per_job".into(), Value::Integer(-1));
        let stage = StageConfig::from_table("gen", &table, None).expect("valid");
        assert_eq!(stage.events_per_job(), None);
    }

    #[test]
    fn quoted_integers_are_accepted() {
        let mut table = stage_table(GENERATION);
        table.insert("n_jobs".into(), Value::String("4".into()));
        let stage = StageConfig::from_table("gen", &table, None).expect("valid");
        assert_eq!(stage.n_jobs(), 4);
    }

    #[test]
    fn rejects_zero_events_per_job() {
        let mut table = stage_table(GENERATION);
        table.insert("events_per_job".into(), Value::Integer(0));
        assert!(matches!(
            StageConfig::from_table("gen", &table, None),
            Err(SimflowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_unknown_input_type() {
        let table = stage_table(
            r#"
            fcl = "reco.fcl"
            n_jobs = 2
            events_per_job = -1
            [input]
            type = "samweb"
            location = "x"
            [output]
            type = "larsoft"
            location = "/data/reco"
        "#,
        );
        assert!(matches!(
            StageConfig::from_table("reco", &table, None),
            Err(SimflowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn dataset_input_with_file_count_and_anaonly() {
        let table = stage_table(
            r#"
            fcl = "ana.fcl"
            n_jobs = 5
            events_per_job = -1
            memory = 4000
            time = "04:00:00"
            concurrent_jobs = 3
            [input]
            type = "dataset"
            location = "/data/reco"
            n_files = 2
            [output]
            type = "gallery"
            location = "/data/ana"
            anaonly = true
        "#,
        );
        let stage =
            StageConfig::from_table("ana", &table, Some("reco".into())).expect("valid stage");

        assert!(stage.has_input());
        assert_eq!(stage.files_per_job(), 2);
        assert!(stage.is_analysis_only());
        assert_eq!(stage.previous_stage(), Some("reco"));
        assert_eq!(stage.memory_mb(), 4000);
        assert_eq!(stage.wall_time(), "04:00:00");
        assert_eq!(stage.concurrent_jobs(), Some(3));
    }
}
