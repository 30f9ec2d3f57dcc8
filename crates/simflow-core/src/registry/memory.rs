//! In-memory registry.
//!
//! Uses `BTreeMap` exclusively so iteration (and therefore claim order)
//! is deterministic. Exclusivity of `&mut self` is the transaction
//! boundary.

use super::{DatasetRegistry, require_absolute, require_distinct_parent};
use crate::{ConsumptionState, FileId, FileRecord, FileType, SimflowError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A volatile registry for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    /// Dataset name -> parent name.
    datasets: BTreeMap<String, Option<String>>,
    /// All files by identifier.
    files: BTreeMap<FileId, FileRecord>,
    /// (consumer, file) -> state. Absent means unyielded.
    consumption: BTreeMap<(String, FileId), ConsumptionState>,
    /// Next identifier handed out by `declare_file`.
    next_file_id: u64,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary files of the consumer's parent, ascending by identifier.
    fn source_files(&self, consumer: &str) -> impl Iterator<Item = &FileRecord> {
        let parent = self.datasets.get(consumer).cloned().flatten();
        self.files.values().filter(move |f| {
            parent.as_deref() == Some(f.dataset.as_str()) && f.file_type == FileType::Primary
        })
    }

    fn state_of(&self, consumer: &str, file: FileId) -> ConsumptionState {
        self.consumption
            .get(&(consumer.to_string(), file))
            .copied()
            .unwrap_or(ConsumptionState::Unyielded)
    }

    fn require_dataset(&self, dataset: &str) -> Result<(), SimflowError> {
        if self.datasets.contains_key(dataset) {
            Ok(())
        } else {
            Err(SimflowError::DatasetNotFound(dataset.to_string()))
        }
    }
}

impl DatasetRegistry for MemoryRegistry {
    fn create_dataset(&mut self, dataset: &str, parent: Option<&str>) -> Result<(), SimflowError> {
        require_distinct_parent(dataset, parent)?;
        match self.datasets.get(dataset) {
            Some(existing) if existing.as_deref() == parent => Ok(()),
            Some(existing) => Err(SimflowError::DatasetParentMismatch {
                dataset: dataset.to_string(),
                existing: existing.clone(),
                requested: parent.map(str::to_string),
            }),
            None => {
                self.datasets
                    .insert(dataset.to_string(), parent.map(str::to_string));
                Ok(())
            }
        }
    }

    fn drop_dataset(&mut self, dataset: &str) -> Result<usize, SimflowError> {
        let removed: BTreeSet<FileId> = self
            .files
            .values()
            .filter(|f| f.dataset == dataset)
            .map(|f| f.id)
            .collect();

        self.files.retain(|id, _| !removed.contains(id));
        self.consumption
            .retain(|(consumer, file), _| consumer != dataset && !removed.contains(file));
        self.datasets.remove(dataset);

        Ok(removed.len())
    }

    fn has_dataset(&self, dataset: &str) -> Result<bool, SimflowError> {
        Ok(self.datasets.contains_key(dataset))
    }

    fn parent(&self, dataset: &str) -> Result<Option<String>, SimflowError> {
        Ok(self.datasets.get(dataset).cloned().flatten())
    }

    fn declare_file(
        &mut self,
        dataset: &str,
        path: &Path,
        file_type: FileType,
        nevents: Option<u64>,
    ) -> Result<FileId, SimflowError> {
        self.require_dataset(dataset)?;
        require_absolute(path)?;

        let id = FileId(self.next_file_id);
        self.next_file_id = self.next_file_id.saturating_add(1);
        self.files.insert(
            id,
            FileRecord {
                id,
                dataset: dataset.to_string(),
                path: path.to_path_buf(),
                file_type,
                nevents,
            },
        );
        Ok(id)
    }

    fn set_nevents(&mut self, file: FileId, nevents: u64) -> Result<(), SimflowError> {
        let record = self
            .files
            .get_mut(&file)
            .ok_or(SimflowError::FileNotFound(file))?;
        record.nevents = Some(nevents);
        Ok(())
    }

    fn list_files(
        &self,
        dataset: &str,
        file_type: Option<FileType>,
    ) -> Result<Vec<FileRecord>, SimflowError> {
        Ok(self
            .files
            .values()
            .filter(|f| f.dataset == dataset && file_type.is_none_or(|t| t == f.file_type))
            .cloned()
            .collect())
    }

    fn count_consumption(
        &self,
        consumer: &str,
        state: ConsumptionState,
    ) -> Result<usize, SimflowError> {
        Ok(self
            .source_files(consumer)
            .filter(|f| self.state_of(consumer, f.id) == state)
            .count())
    }

    fn claim(&mut self, consumer: &str, max_files: usize) -> Result<Vec<FileRecord>, SimflowError> {
        self.require_dataset(consumer)?;

        let claimed: Vec<FileRecord> = self
            .source_files(consumer)
            .filter(|f| self.state_of(consumer, f.id) == ConsumptionState::Unyielded)
            .take(max_files)
            .cloned()
            .collect();

        for file in &claimed {
            self.consumption.insert(
                (consumer.to_string(), file.id),
                ConsumptionState::Yielded,
            );
        }
        Ok(claimed)
    }

    fn confirm(&mut self, consumer: &str, files: &[FileId]) -> Result<(), SimflowError> {
        self.require_dataset(consumer)?;
        let files: BTreeSet<FileId> = files.iter().copied().collect();

        // Validate everything before touching any record.
        for &file in &files {
            if !self.files.contains_key(&file) {
                return Err(SimflowError::FileNotFound(file));
            }
            let from = self.state_of(consumer, file);
            if from != ConsumptionState::Yielded {
                return Err(SimflowError::InvalidStateTransition {
                    dataset: consumer.to_string(),
                    file,
                    from,
                    to: ConsumptionState::Consumed,
                });
            }
        }

        for file in files {
            self.consumption
                .insert((consumer.to_string(), file), ConsumptionState::Consumed);
        }
        Ok(())
    }

    fn reset(&mut self, consumer: &str) -> Result<usize, SimflowError> {
        self.require_dataset(consumer)?;

        let before = self.consumption.len();
        self.consumption.retain(|(c, _), state| {
            !(c == consumer && *state == ConsumptionState::Yielded)
        });
        Ok(before - self.consumption.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
