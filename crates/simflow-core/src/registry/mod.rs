//! # Dataset Registry
//!
//! The file and consumption ledger shared by every job of a project.
//!
//! This module defines the `DatasetRegistry` trait, implemented by the
//! in-memory [`MemoryRegistry`] and the disk-backed
//! [`RedbRegistry`](crate::storage::RedbRegistry).
//!
//! ## Consumption Records
//!
//! A consumption record relates a primary file of a parent dataset to one
//! consumer (child) dataset. Files without a stored record are
//! `Unyielded`, so files that arrive upstream after the consumer was
//! registered can be claimed straight away.

mod memory;

pub use memory::MemoryRegistry;

use crate::{ConsumptionState, FileId, FileRecord, FileType, SimflowError};
use std::path::Path;

// =============================================================================
// DATASETREGISTRY TRAIT
// =============================================================================

/// Operations the core needs from the file ledger.
///
/// Queries against an unregistered dataset behave like queries against an
/// empty one. Mutations of consumption state require the consumer to be
/// registered.
///
/// `claim`, `confirm` and `reset` are each a single atomic
/// read-modify-write: implementations run them inside one transaction (or
/// under `&mut self` exclusivity) so concurrent callers never observe or
/// produce overlapping claims.
pub trait DatasetRegistry {
    /// Register a dataset with an optional parent (its upstream dataset).
    ///
    /// Re-registering with the same parent is a no-op; a different parent
    /// is `SimflowError::DatasetParentMismatch`.
    fn create_dataset(&mut self, dataset: &str, parent: Option<&str>) -> Result<(), SimflowError>;

    /// Remove a dataset, its files, its own consumption records and the
    /// records other datasets hold on its files. Returns the number of
    /// files removed; dropping an unknown dataset removes nothing.
    fn drop_dataset(&mut self, dataset: &str) -> Result<usize, SimflowError>;

    /// Whether the dataset is registered.
    fn has_dataset(&self, dataset: &str) -> Result<bool, SimflowError>;

    /// The registered parent of a dataset.
    fn parent(&self, dataset: &str) -> Result<Option<String>, SimflowError>;

    /// Record a produced file. The path must be absolute.
    fn declare_file(
        &mut self,
        dataset: &str,
        path: &Path,
        file_type: FileType,
        nevents: Option<u64>,
    ) -> Result<FileId, SimflowError>;

    /// Correct the event count of a file.
    fn set_nevents(&mut self, file: FileId, nevents: u64) -> Result<(), SimflowError>;

    /// Files of a dataset in ascending identifier order, optionally of
    /// one type only.
    fn list_files(
        &self,
        dataset: &str,
        file_type: Option<FileType>,
    ) -> Result<Vec<FileRecord>, SimflowError>;

    /// Sum of known event counts of one file type.
    ///
    /// `None` when no file of that type has a known count.
    fn sum_events(&self, dataset: &str, file_type: FileType) -> Result<Option<u64>, SimflowError> {
        let files = self.list_files(dataset, Some(file_type))?;
        Ok(files
            .iter()
            .filter_map(|f| f.nevents)
            .fold(None, |acc: Option<u64>, n| {
                Some(acc.unwrap_or(0).saturating_add(n))
            }))
    }

    /// Number of files of one type.
    fn count_files(&self, dataset: &str, file_type: FileType) -> Result<usize, SimflowError> {
        Ok(self.list_files(dataset, Some(file_type))?.len())
    }

    /// Number of parent files in the given state relative to `consumer`.
    fn count_consumption(
        &self,
        consumer: &str,
        state: ConsumptionState,
    ) -> Result<usize, SimflowError>;

    /// Move up to `max_files` unyielded parent files, lowest identifiers
    /// first, to `Yielded` and return them.
    fn claim(&mut self, consumer: &str, max_files: usize) -> Result<Vec<FileRecord>, SimflowError>;

    /// Move the given files from `Yielded` to `Consumed`.
    ///
    /// All-or-nothing: if any file is not yielded to `consumer`, nothing
    /// changes and `SimflowError::InvalidStateTransition` is returned.
    fn confirm(&mut self, consumer: &str, files: &[FileId]) -> Result<(), SimflowError>;

    /// Move every file yielded to `consumer` back to `Unyielded`.
    /// Returns how many were reset.
    fn reset(&mut self, consumer: &str) -> Result<usize, SimflowError>;
}

impl<R: DatasetRegistry + ?Sized> DatasetRegistry for &mut R {
    fn create_dataset(&mut self, dataset: &str, parent: Option<&str>) -> Result<(), SimflowError> {
        (**self).create_dataset(dataset, parent)
    }

    fn drop_dataset(&mut self, dataset: &str) -> Result<usize, SimflowError> {
        (**self).drop_dataset(dataset)
    }

    fn has_dataset(&self, dataset: &str) -> Result<bool, SimflowError> {
        (**self).has_dataset(dataset)
    }

    fn parent(&self, dataset: &str) -> Result<Option<String>, SimflowError> {
        (**self).parent(dataset)
    }

    fn declare_file(
        &mut self,
        dataset: &str,
        path: &Path,
        file_type: FileType,
        nevents: Option<u64>,
    ) -> Result<FileId, SimflowError> {
        (**self).declare_file(dataset, path, file_type, nevents)
    }

    fn set_nevents(&mut self, file: FileId, nevents: u64) -> Result<(), SimflowError> {
        (**self).set_nevents(file, nevents)
    }

    fn list_files(
        &self,
        dataset: &str,
        file_type: Option<FileType>,
    ) -> Result<Vec<FileRecord>, SimflowError> {
        (**self).list_files(dataset, file_type)
    }

    fn sum_events(&self, dataset: &str, file_type: FileType) -> Result<Option<u64>, SimflowError> {
        (**self).sum_events(dataset, file_type)
    }

    fn count_files(&self, dataset: &str, file_type: FileType) -> Result<usize, SimflowError> {
        (**self).count_files(dataset, file_type)
    }

    fn count_consumption(
        &self,
        consumer: &str,
        state: ConsumptionState,
    ) -> Result<usize, SimflowError> {
        (**self).count_consumption(consumer, state)
    }

    fn claim(&mut self, consumer: &str, max_files: usize) -> Result<Vec<FileRecord>, SimflowError> {
        (**self).claim(consumer, max_files)
    }

    fn confirm(&mut self, consumer: &str, files: &[FileId]) -> Result<(), SimflowError> {
        (**self).confirm(consumer, files)
    }

    fn reset(&mut self, consumer: &str) -> Result<usize, SimflowError> {
        (**self).reset(consumer)
    }
}

// =============================================================================
// REGISTRYSOURCE TRAIT
// =============================================================================

/// Hands out registry handles, one per operation.
///
/// A handle may lock the registry against other processes for as long as
/// it lives. Acquire it right before the registry calls and drop it before
/// waiting on anything else.
pub trait RegistrySource {
    /// The handle type; may borrow from the source.
    type Handle<'a>: DatasetRegistry
    where
        Self: 'a;

    /// Take a handle on the registry.
    fn acquire(&mut self) -> Result<Self::Handle<'_>, SimflowError>;
}

/// An in-memory registry is its own source: the handle is a borrow.
impl RegistrySource for MemoryRegistry {
    type Handle<'a> = &'a mut MemoryRegistry;

    fn acquire(&mut self) -> Result<Self::Handle<'_>, SimflowError> {
        Ok(self)
    }
}

/// Reject relative paths before they reach a ledger.
pub(crate) fn require_absolute(path: &Path) -> Result<(), SimflowError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(SimflowError::InvalidConfig(format!(
            "File path {} must be absolute",
            path.display()
        )))
    }
}

/// Reject a dataset declared as its own parent.
pub(crate) fn require_distinct_parent(
    dataset: &str,
    parent: Option<&str>,
) -> Result<(), SimflowError> {
    if parent == Some(dataset) {
        return Err(SimflowError::InvalidConfig(format!(
            "Dataset {dataset} cannot be its own parent"
        )));
    }
    Ok(())
}
