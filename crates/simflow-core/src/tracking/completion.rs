//! # Completion Evaluation
//!
//! Compares what a stage was asked to produce with what the registry says
//! it produced, and estimates how many makeup jobs would close the gap.
//!
//! ## Targets
//!
//! A stage targets `n_jobs * events_per_job` events, or is unbounded when
//! `events_per_job = -1`. Exactly one file type carries the target: the
//! analysis files for `anaonly` stages, the primary files otherwise. The
//! other type's target is zero.
//!
//! ## Makeup Estimate
//!
//! Events per file are estimated with truncating integer division, which
//! leans towards one extra makeup job rather than one too few.

use super::consumption::{ConsumptionCounts, consumption_counts};
use crate::config::{ProjectConfig, StageConfig};
use crate::registry::DatasetRegistry;
use crate::{FileType, SimflowError};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// TARGETS
// =============================================================================

/// Number of events a file type is expected to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// A fixed event count.
    Events(u64),
    /// No numeric target.
    Unbounded,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Events(n) => write!(f, "{n}"),
            Target::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Targets for both file types of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTargets {
    pub output: Target,
    pub analysis: Target,
}

impl StageTargets {
    /// The target that decides completion, with its file type.
    #[must_use]
    pub fn active(&self, anaonly: bool) -> (FileType, Target) {
        if anaonly {
            (FileType::Analysis, self.analysis)
        } else {
            (FileType::Primary, self.output)
        }
    }
}

/// What the registry holds for one dataset and file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Produced {
    /// Sum of known event counts; `None` when none are known.
    pub events: Option<u64>,
    pub file_count: usize,
}

/// Produced-versus-target figures for one file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProgress {
    pub target: Target,
    pub produced: Produced,
}

/// Everything the status and check commands display for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub stage: String,
    pub analysis: TypeProgress,
    pub output: TypeProgress,
    /// Present when the stage's dataset has a registered parent.
    pub consumption: Option<ConsumptionCounts>,
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Read-only completion queries over a project and its registry.
pub struct CompletionEvaluator<'a, R: DatasetRegistry + ?Sized> {
    project: &'a ProjectConfig,
    registry: &'a R,
}

impl<'a, R: DatasetRegistry + ?Sized> CompletionEvaluator<'a, R> {
    pub fn new(project: &'a ProjectConfig, registry: &'a R) -> Self {
        Self { project, registry }
    }

    /// Targets for a stage; only the type matching `anaonly` is non-zero.
    #[must_use]
    pub fn target(&self, stage: &StageConfig) -> StageTargets {
        let total = match stage.events_per_job() {
            Some(per_job) => Target::Events(u64::from(stage.n_jobs()).saturating_mul(per_job)),
            None => Target::Unbounded,
        };

        if stage.is_analysis_only() {
            StageTargets {
                output: Target::Events(0),
                analysis: total,
            }
        } else {
            StageTargets {
                output: total,
                analysis: Target::Events(0),
            }
        }
    }

    /// Events and files of one type in a dataset.
    pub fn produced(&self, dataset: &str, file_type: FileType) -> Result<Produced, SimflowError> {
        Ok(Produced {
            events: self.registry.sum_events(dataset, file_type)?,
            file_count: self.registry.count_files(dataset, file_type)?,
        })
    }

    /// Extra jobs needed for the stage to reach its target.
    ///
    /// Non-positive means the stage is complete. With nothing produced yet
    /// the answer is the full `n_jobs`.
    ///
    /// # Errors
    ///
    /// `SimflowError::DataIntegrity` when events were recorded without any
    /// files, or when there are fewer events than files so no per-file
    /// rate can be derived.
    pub fn makeup_job_count(&self, stage: &StageConfig) -> Result<i64, SimflowError> {
        let (file_type, target) = self.target(stage).active(stage.is_analysis_only());
        let produced = self.produced(stage.output_dataset(), file_type)?;

        let events = match produced.events {
            None | Some(0) => return Ok(i64::from(stage.n_jobs())),
            Some(events) => events,
        };
        if produced.file_count == 0 {
            return Err(SimflowError::DataIntegrity {
                stage: stage.name().to_string(),
                detail: format!("{events} events recorded across zero type-{} files", file_type.code()),
            });
        }

        match target {
            Target::Events(target) => {
                let per_file = events / produced.file_count as u64;
                if per_file == 0 {
                    return Err(SimflowError::DataIntegrity {
                        stage: stage.name().to_string(),
                        detail: format!(
                            "{events} events across {} files is less than one event per file",
                            produced.file_count
                        ),
                    });
                }
                let missing = saturating_i64(target).saturating_sub(saturating_i64(events));
                let jobs = missing
                    .div_euclid(saturating_i64(per_file))
                    .saturating_add(1);

                tracing::debug!(
                    stage = stage.name(),
                    events,
                    files = produced.file_count,
                    per_file,
                    missing,
                    jobs,
                    "estimated makeup jobs"
                );
                // Reaching the target exactly leaves nothing to make up.
                Ok(if missing <= 0 { jobs.min(0) } else { jobs })
            }
            Target::Unbounded => {
                if self.project.input_dataset(stage).is_none() {
                    return Ok(0);
                }
                let counts = consumption_counts(self.registry, stage.output_dataset())?;
                let per_job = stage.files_per_job().max(1) as usize;
                Ok(saturating_i64(counts.outstanding().div_ceil(per_job) as u64))
            }
        }
    }

    /// Produced and target counts for both types, plus the consumption
    /// snapshot when the stage's dataset has a parent.
    pub fn report(&self, stage: &StageConfig) -> Result<CompletionReport, SimflowError> {
        let dataset = stage.output_dataset();
        let targets = self.target(stage);

        let consumption = if self.registry.parent(dataset)?.is_some() {
            Some(consumption_counts(self.registry, dataset)?)
        } else {
            None
        };

        Ok(CompletionReport {
            stage: stage.name().to_string(),
            analysis: TypeProgress {
                target: targets.analysis,
                produced: self.produced(dataset, FileType::Analysis)?,
            },
            output: TypeProgress {
                target: targets.output,
                produced: self.produced(dataset, FileType::Primary)?,
            },
            consumption,
        })
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// TESTS
// =============================================================================
