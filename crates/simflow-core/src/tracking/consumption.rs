//! # Consumption Tracker
//!
//! Hands upstream files to downstream jobs.
//!
//! A job of a consuming stage claims files when it starts, confirms them
//! once processed, and a failed job's claims are handed back with
//! `reset_yielded`. The tracker holds no state of its own: every call goes
//! straight to the registry, whose transaction is the serialization point
//! for concurrent jobs.

use crate::config::{ProjectConfig, StageConfig};
use crate::registry::DatasetRegistry;
use crate::{ConsumptionState, FileId, FileRecord, SimflowError};
use serde::{Deserialize, Serialize};

// =============================================================================
// COUNTS
// =============================================================================

/// Snapshot of a consumer's view of its upstream files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsumptionCounts {
    pub unyielded: usize,
    pub yielded: usize,
    pub consumed: usize,
}

impl ConsumptionCounts {
    /// Every upstream primary file, whatever its state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.unyielded
            .saturating_add(self.yielded)
            .saturating_add(self.consumed)
    }

    /// Files not yet confirmed processed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.unyielded.saturating_add(self.yielded)
    }
}

/// Read the three consumption counts of a consumer dataset.
pub fn consumption_counts<R: DatasetRegistry + ?Sized>(
    registry: &R,
    dataset: &str,
) -> Result<ConsumptionCounts, SimflowError> {
    Ok(ConsumptionCounts {
        unyielded: registry.count_consumption(dataset, ConsumptionState::Unyielded)?,
        yielded: registry.count_consumption(dataset, ConsumptionState::Yielded)?,
        consumed: registry.count_consumption(dataset, ConsumptionState::Consumed)?,
    })
}

// =============================================================================
// TRACKER
// =============================================================================

/// Mediates file hand-off between a stage and its upstream stage.
pub struct ConsumptionTracker<'a, R: DatasetRegistry + ?Sized> {
    project: &'a ProjectConfig,
    registry: &'a mut R,
}

impl<'a, R: DatasetRegistry + ?Sized> ConsumptionTracker<'a, R> {
    /// Create a tracker over a project and its registry.
    pub fn new(project: &'a ProjectConfig, registry: &'a mut R) -> Self {
        Self { project, registry }
    }

    /// Claim up to `count` unyielded upstream files for one job.
    ///
    /// Returns an empty list when the stage has no input or no upstream
    /// stage. Fewer files than requested is not an error.
    pub fn claim_files(
        &mut self,
        consumer: &StageConfig,
        count: usize,
    ) -> Result<Vec<FileRecord>, SimflowError> {
        let Some(source) = self.project.input_dataset(consumer) else {
            tracing::debug!(stage = consumer.name(), "stage has no input, nothing to claim");
            return Ok(Vec::new());
        };
        if count == 0 {
            return Ok(Vec::new());
        }
        self.require_linked(consumer, source)?;

        let files = self.registry.claim(consumer.output_dataset(), count)?;
        tracing::info!(
            stage = consumer.name(),
            source,
            requested = count,
            claimed = files.len(),
            "claimed input files"
        );
        Ok(files)
    }

    /// Mark previously claimed files as processed.
    pub fn confirm_consumed(
        &mut self,
        consumer: &StageConfig,
        files: &[FileRecord],
    ) -> Result<(), SimflowError> {
        let ids: Vec<FileId> = files.iter().map(|f| f.id).collect();
        self.confirm_consumed_ids(consumer, &ids)
    }

    /// Same as [`confirm_consumed`](Self::confirm_consumed), by identifier.
    ///
    /// A stage without input never has yielded files, so confirming any
    /// file for it is an invalid transition.
    pub fn confirm_consumed_ids(
        &mut self,
        consumer: &StageConfig,
        files: &[FileId],
    ) -> Result<(), SimflowError> {
        let Some(&first) = files.first() else {
            return Ok(());
        };
        if self.project.input_dataset(consumer).is_none() {
            return Err(SimflowError::InvalidStateTransition {
                dataset: consumer.output_dataset().to_string(),
                file: first,
                from: ConsumptionState::Unyielded,
                to: ConsumptionState::Consumed,
            });
        }

        self.registry.confirm(consumer.output_dataset(), files)?;
        tracing::info!(
            stage = consumer.name(),
            confirmed = files.len(),
            "confirmed consumed files"
        );
        Ok(())
    }

    /// Hand every yielded-but-unconfirmed file back to the pool.
    ///
    /// Recovery path for jobs that died before confirming. Idempotent.
    pub fn reset_yielded(&mut self, consumer: &StageConfig) -> Result<usize, SimflowError> {
        if self.project.input_dataset(consumer).is_none() {
            return Ok(0);
        }
        let reset = self.registry.reset(consumer.output_dataset())?;
        tracing::info!(stage = consumer.name(), reset, "reset yielded files");
        Ok(reset)
    }

    /// Current counts for a consumer dataset.
    pub fn counts(&self, dataset: &str) -> Result<ConsumptionCounts, SimflowError> {
        consumption_counts(&*self.registry, dataset)
    }

    /// The registered parent must still match the configured upstream stage.
    fn require_linked(&self, consumer: &StageConfig, source: &str) -> Result<(), SimflowError> {
        let dataset = consumer.output_dataset();
        if !self.registry.has_dataset(dataset)? {
            return Err(SimflowError::DatasetNotFound(dataset.to_string()));
        }
        let registered = self.registry.parent(dataset)?;
        if registered.as_deref() != Some(source) {
            return Err(SimflowError::DatasetParentMismatch {
                dataset: dataset.to_string(),
                existing: registered,
                requested: Some(source.to_string()),
            });
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileType;
    use crate::registry::MemoryRegistry;
    use std::path::PathBuf;

    const PROJECT: &str = r#"
        name = "test"
        top_dir = "/tmp/test"

        [[stages]]
        name = "gen"
        fcl = "gen.fcl"
        n_jobs = 5
        events_per_job = 100
        input = { type = "none", location = "none" }
        output = { type = "larsoft", location = "/tmp/test/gen" }

        [[stages]]
        name = "reco"
        fcl = "reco.fcl"
        n_jobs = 5
        events_per_job = -1
        input = { type = "dataset", location = "gen" }
        output = { type = "larsoft", location = "/tmp/test/reco" }
    "#;

    fn setup(n_files: u64) -> (ProjectConfig, MemoryRegistry) {
        let project = ProjectConfig::from_toml_str(PROJECT).expect("project");
        let mut registry = MemoryRegistry::new();
        registry.create_dataset("gen", None).expect("gen");
        registry.create_dataset("reco", Some("gen")).expect("reco");
        for i in 0..n_files {
            registry
                .declare_file(
                    "gen",
                    &PathBuf::from(format!("/tmp/test/gen/{i}.root")),
                    FileType::Primary,
                    Some(100),
                )
                .expect("declare");
        }
        (project, registry)
    }

    #[test]
    fn stage_without_input_claims_nothing() {
        let (project, mut registry) = setup(5);
        let gen_stage = project.stage("gen").expect("gen").clone();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        assert!(tracker.claim_files(&gen_stage, 3).expect("claim").is_empty());
        assert_eq!(tracker.reset_yielded(&gen_stage).expect("reset"), 0);
    }

    #[test]
    fn claim_then_remaining() {
        let (project, mut registry) = setup(5);
        let reco = project.stage("reco").expect("reco").clone();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        let first = tracker.claim_files(&reco, 3).expect("claim");
        assert_eq!(
            first.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![FileId(0), FileId(1), FileId(2)]
        );
        let second = tracker.claim_files(&reco, 3).expect("claim");
        assert_eq!(
            second.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![FileId(3), FileId(4)]
        );

        let counts = tracker.counts("reco").expect("counts");
        assert_eq!(counts.yielded, 5);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn confirm_moves_exactly_the_given_files() {
        let (project, mut registry) = setup(4);
        let reco = project.stage("reco").expect("reco").clone();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        let claimed = tracker.claim_files(&reco, 2).expect("claim");
        tracker.confirm_consumed(&reco, &claimed).expect("confirm");

        let counts = tracker.counts("reco").expect("counts");
        assert_eq!(
            counts,
            ConsumptionCounts {
                unyielded: 2,
                yielded: 0,
                consumed: 2
            }
        );
    }

    #[test]
    fn double_confirmation_is_rejected() {
        let (project, mut registry) = setup(2);
        let reco = project.stage("reco").expect("reco").clone();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        let claimed = tracker.claim_files(&reco, 1).expect("claim");
        tracker.confirm_consumed(&reco, &claimed).expect("confirm");

        assert!(matches!(
            tracker.confirm_consumed(&reco, &claimed),
            Err(SimflowError::InvalidStateTransition {
                from: ConsumptionState::Consumed,
                ..
            })
        ));
    }

    #[test]
    fn confirm_on_stage_without_input_fails() {
        let (project, mut registry) = setup(1);
        let gen_stage = project.stage("gen").expect("gen").clone();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        assert!(tracker.confirm_consumed_ids(&gen_stage, &[]).is_ok());
        assert!(matches!(
            tracker.confirm_consumed_ids(&gen_stage, &[FileId(0)]),
            Err(SimflowError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn reset_is_idempotent() {
        let (project, mut registry) = setup(3);
        let reco = project.stage("reco").expect("reco").clone();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        tracker.claim_files(&reco, 3).expect("claim");
        assert_eq!(tracker.reset_yielded(&reco).expect("reset"), 3);
        let after_first = tracker.counts("reco").expect("counts");
        assert_eq!(tracker.reset_yielded(&reco).expect("reset"), 0);
        assert_eq!(tracker.counts("reco").expect("counts"), after_first);
        assert_eq!(after_first.unyielded, 3);
    }

    #[test]
    fn unregistered_consumer_is_reported() {
        let project = ProjectConfig::from_toml_str(PROJECT).expect("project");
        let reco = project.stage("reco").expect("reco").clone();
        let mut registry = MemoryRegistry::new();
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        assert!(matches!(
            tracker.claim_files(&reco, 1),
            Err(SimflowError::DatasetNotFound(name)) if name == "reco"
        ));
    }

    #[test]
    fn mismatched_parent_is_reported() {
        let project = ProjectConfig::from_toml_str(PROJECT).expect("project");
        let reco = project.stage("reco").expect("reco").clone();
        let mut registry = MemoryRegistry::new();
        registry.create_dataset("reco", Some("other")).expect("reco");
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);

        assert!(matches!(
            tracker.claim_files(&reco, 1),
            Err(SimflowError::DatasetParentMismatch { .. })
        ));
    }
}
