//! # redb-backed Registry
//!
//! A disk-backed dataset registry using the redb embedded database.
//!
//! redb provides what the consumption model relies on:
//! - ACID transactions (a claim is one write transaction)
//! - A single writer at a time, so concurrent claims serialize
//! - Crash safety (copy-on-write B-trees)
//!
//! Nothing is cached in memory: every call opens a fresh transaction and
//! re-reads current state.

use crate::registry::{
    DatasetRegistry, RegistrySource, require_absolute, require_distinct_parent,
};
use crate::{ConsumptionState, FileId, FileRecord, FileType, SimflowError};
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Table for datasets: name -> serialized `DatasetEntry`
const DATASETS: TableDefinition<&str, &[u8]> = TableDefinition::new("datasets");

/// Table for files: FileId(u64) -> serialized `FileRecord`
const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");

/// Per-dataset file index: (dataset_id, file_id) -> file type code.
/// Range scans over one dataset come out in ascending file order.
const DATASET_FILES: TableDefinition<(u64, u64), u8> = TableDefinition::new("dataset_files");

/// Consumption records: (consumer_dataset_id, file_id) -> state code.
/// A missing row means unyielded.
const CONSUMPTION: TableDefinition<(u64, u64), u8> = TableDefinition::new("consumption");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_FILE_ID: &str = "next_file_id";
const NEXT_DATASET_ID: &str = "next_dataset_id";

/// Pause between attempts to open a database held by another process.
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Stored per dataset. The parent is kept by name and resolved on use.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetEntry {
    id: u64,
    parent: Option<String>,
}

/// A registry persisted in a redb file.
pub struct RedbRegistry {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRegistry")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ENCODING HELPERS
// =============================================================================

fn storage<E: std::fmt::Display>(e: E) -> SimflowError {
    SimflowError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SimflowError> {
    postcard::to_allocvec(value).map_err(|e| SimflowError::SerializationError(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, SimflowError> {
    postcard::from_bytes(bytes).map_err(|e| SimflowError::SerializationError(e.to_string()))
}

// =============================================================================
// TABLE READERS (shared by read and write transactions)
// =============================================================================

fn dataset_entry(
    datasets: &impl ReadableTable<&'static str, &'static [u8]>,
    name: &str,
) -> Result<Option<DatasetEntry>, SimflowError> {
    match datasets.get(name).map_err(storage)? {
        Some(data) => Ok(Some(decode(data.value())?)),
        None => Ok(None),
    }
}

fn dataset_file_ids(
    index: &impl ReadableTable<(u64, u64), u8>,
    dataset_id: u64,
    file_type: Option<FileType>,
) -> Result<Vec<FileId>, SimflowError> {
    let mut ids = Vec::new();
    for entry in index
        .range((dataset_id, 0u64)..=(dataset_id, u64::MAX))
        .map_err(storage)?
    {
        let (key, value) = entry.map_err(storage)?;
        let (_dataset, file_id) = key.value();
        let stored = FileType::from_code(value.value())?;
        if file_type.is_none_or(|t| t == stored) {
            ids.push(FileId(file_id));
        }
    }
    Ok(ids)
}

fn load_file(
    files: &impl ReadableTable<u64, &'static [u8]>,
    id: FileId,
) -> Result<FileRecord, SimflowError> {
    match files.get(id.0).map_err(storage)? {
        Some(data) => decode(data.value()),
        None => Err(SimflowError::FileNotFound(id)),
    }
}

fn state_of(
    consumption: &impl ReadableTable<(u64, u64), u8>,
    consumer_id: u64,
    file: FileId,
) -> Result<ConsumptionState, SimflowError> {
    match consumption.get((consumer_id, file.0)).map_err(storage)? {
        Some(code) => ConsumptionState::from_code(code.value()),
        None => Ok(ConsumptionState::Unyielded),
    }
}

/// Primary files of the consumer's parent. Empty when either side is
/// unregistered.
fn source_file_ids(
    datasets: &impl ReadableTable<&'static str, &'static [u8]>,
    index: &impl ReadableTable<(u64, u64), u8>,
    consumer: &DatasetEntry,
) -> Result<Vec<FileId>, SimflowError> {
    let Some(parent_name) = consumer.parent.as_deref() else {
        return Ok(Vec::new());
    };
    match dataset_entry(datasets, parent_name)? {
        Some(parent) => dataset_file_ids(index, parent.id, Some(FileType::Primary)),
        None => Ok(Vec::new()),
    }
}

fn next_id(
    meta: &impl ReadableTable<&'static str, u64>,
    key: &str,
) -> Result<u64, SimflowError> {
    Ok(meta
        .get(key)
        .map_err(storage)?
        .map(|v| v.value())
        .unwrap_or(0))
}

// =============================================================================
// REGISTRY
// =============================================================================

impl RedbRegistry {
    /// Open or create a registry database at the given path.
    ///
    /// Fails straight away if another process holds the database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SimflowError> {
        Self::open_with_patience(path, Duration::ZERO)
    }

    /// Like [`open`](Self::open), but keeps retrying for up to `patience`
    /// while another process holds the database.
    ///
    /// Array tasks each open the registry for a single claim or declare, so
    /// a short wait is normally enough.
    pub fn open_with_patience(
        path: impl AsRef<Path>,
        patience: Duration,
    ) -> Result<Self, SimflowError> {
        let path = path.as_ref();
        let started = Instant::now();

        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(DatabaseError::DatabaseAlreadyOpen) if started.elapsed() < patience => {
                    tracing::debug!(path = %path.display(), "registry busy, retrying");
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(e) => return Err(storage(e)),
            }
        };

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage)?;
            let _ = write_txn.open_table(DATASETS).map_err(storage)?;
            let _ = write_txn.open_table(FILES).map_err(storage)?;
            let _ = write_txn.open_table(DATASET_FILES).map_err(storage)?;
            let _ = write_txn.open_table(CONSUMPTION).map_err(storage)?;
            let _ = write_txn.open_table(METADATA).map_err(storage)?;
            write_txn.commit().map_err(storage)?;
        }

        tracing::debug!(path = %path.display(), "opened registry");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// SOURCE
// =============================================================================

/// Opens the registry file anew for every operation.
///
/// Concurrent jobs share one database file and redb admits a single open
/// handle at a time, so each handle lives only as long as the operation
/// that needs it.
#[derive(Debug, Clone)]
pub struct RedbSource {
    path: PathBuf,
    patience: Duration,
}

impl RedbSource {
    /// Source for the database at `path`; each acquire waits up to
    /// `patience` for another process to let go of the file.
    pub fn new(path: impl Into<PathBuf>, patience: Duration) -> Self {
        Self {
            path: path.into(),
            patience,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistrySource for RedbSource {
    type Handle<'a> = RedbRegistry;

    fn acquire(&mut self) -> Result<RedbRegistry, SimflowError> {
        RedbRegistry::open_with_patience(&self.path, self.patience)
    }
}

impl DatasetRegistry for RedbRegistry {
    fn create_dataset(&mut self, dataset: &str, parent: Option<&str>) -> Result<(), SimflowError> {
        require_distinct_parent(dataset, parent)?;

        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut datasets = write_txn.open_table(DATASETS).map_err(storage)?;
            let mut meta = write_txn.open_table(METADATA).map_err(storage)?;

            if let Some(existing) = dataset_entry(&datasets, dataset)? {
                if existing.parent.as_deref() == parent {
                    return Ok(());
                }
                return Err(SimflowError::DatasetParentMismatch {
                    dataset: dataset.to_string(),
                    existing: existing.parent,
                    requested: parent.map(str::to_string),
                });
            }

            let id = next_id(&meta, NEXT_DATASET_ID)?;
            let entry = DatasetEntry {
                id,
                parent: parent.map(str::to_string),
            };
            let bytes = encode(&entry)?;
            datasets
                .insert(dataset, bytes.as_slice())
                .map_err(storage)?;
            meta.insert(NEXT_DATASET_ID, id.saturating_add(1))
                .map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn drop_dataset(&mut self, dataset: &str) -> Result<usize, SimflowError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let removed = {
            let mut datasets = write_txn.open_table(DATASETS).map_err(storage)?;
            let mut files = write_txn.open_table(FILES).map_err(storage)?;
            let mut index = write_txn.open_table(DATASET_FILES).map_err(storage)?;
            let mut consumption = write_txn.open_table(CONSUMPTION).map_err(storage)?;

            let Some(entry) = dataset_entry(&datasets, dataset)? else {
                return Ok(0);
            };
            let file_ids = dataset_file_ids(&index, entry.id, None)?;

            // Children hold consumption records on this dataset's files.
            let mut children = Vec::new();
            for item in datasets.iter().map_err(storage)? {
                let (_name, data) = item.map_err(storage)?;
                let child: DatasetEntry = decode(data.value())?;
                if child.parent.as_deref() == Some(dataset) {
                    children.push(child.id);
                }
            }

            for id in &file_ids {
                files.remove(id.0).map_err(storage)?;
                index.remove((entry.id, id.0)).map_err(storage)?;
                for child in &children {
                    consumption.remove((*child, id.0)).map_err(storage)?;
                }
            }

            let own_records: Vec<(u64, u64)> = consumption
                .range((entry.id, 0u64)..=(entry.id, u64::MAX))
                .map_err(storage)?
                .map(|item| item.map(|(key, _)| key.value()).map_err(storage))
                .collect::<Result<_, _>>()?;
            for key in own_records {
                consumption.remove(key).map_err(storage)?;
            }

            datasets.remove(dataset).map_err(storage)?;
            file_ids.len()
        };
        write_txn.commit().map_err(storage)?;

        tracing::debug!(dataset, removed, "dropped dataset");
        Ok(removed)
    }

    fn has_dataset(&self, dataset: &str) -> Result<bool, SimflowError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let datasets = read_txn.open_table(DATASETS).map_err(storage)?;
        Ok(dataset_entry(&datasets, dataset)?.is_some())
    }

    fn parent(&self, dataset: &str) -> Result<Option<String>, SimflowError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let datasets = read_txn.open_table(DATASETS).map_err(storage)?;
        Ok(dataset_entry(&datasets, dataset)?.and_then(|e| e.parent))
    }

    fn declare_file(
        &mut self,
        dataset: &str,
        path: &Path,
        file_type: FileType,
        nevents: Option<u64>,
    ) -> Result<FileId, SimflowError> {
        require_absolute(path)?;

        let write_txn = self.db.begin_write().map_err(storage)?;
        let id = {
            let datasets = write_txn.open_table(DATASETS).map_err(storage)?;
            let mut files = write_txn.open_table(FILES).map_err(storage)?;
            let mut index = write_txn.open_table(DATASET_FILES).map_err(storage)?;
            let mut meta = write_txn.open_table(METADATA).map_err(storage)?;

            let entry = dataset_entry(&datasets, dataset)?
                .ok_or_else(|| SimflowError::DatasetNotFound(dataset.to_string()))?;

            let id = FileId(next_id(&meta, NEXT_FILE_ID)?);
            let record = FileRecord {
                id,
                dataset: dataset.to_string(),
                path: path.to_path_buf(),
                file_type,
                nevents,
            };
            let bytes = encode(&record)?;

            files.insert(id.0, bytes.as_slice()).map_err(storage)?;
            index
                .insert((entry.id, id.0), file_type.code())
                .map_err(storage)?;
            meta.insert(NEXT_FILE_ID, id.0.saturating_add(1))
                .map_err(storage)?;
            id
        };
        write_txn.commit().map_err(storage)?;
        Ok(id)
    }

    fn set_nevents(&mut self, file: FileId, nevents: u64) -> Result<(), SimflowError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut files = write_txn.open_table(FILES).map_err(storage)?;
            let mut record = load_file(&files, file)?;
            record.nevents = Some(nevents);
            let bytes = encode(&record)?;
            files.insert(file.0, bytes.as_slice()).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn list_files(
        &self,
        dataset: &str,
        file_type: Option<FileType>,
    ) -> Result<Vec<FileRecord>, SimflowError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let datasets = read_txn.open_table(DATASETS).map_err(storage)?;
        let files = read_txn.open_table(FILES).map_err(storage)?;
        let index = read_txn.open_table(DATASET_FILES).map_err(storage)?;

        let Some(entry) = dataset_entry(&datasets, dataset)? else {
            return Ok(Vec::new());
        };
        dataset_file_ids(&index, entry.id, file_type)?
            .into_iter()
            .map(|id| load_file(&files, id))
            .collect()
    }

    fn count_consumption(
        &self,
        consumer: &str,
        state: ConsumptionState,
    ) -> Result<usize, SimflowError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let datasets = read_txn.open_table(DATASETS).map_err(storage)?;
        let index = read_txn.open_table(DATASET_FILES).map_err(storage)?;
        let consumption = read_txn.open_table(CONSUMPTION).map_err(storage)?;

        let Some(entry) = dataset_entry(&datasets, consumer)? else {
            return Ok(0);
        };
        let mut count = 0usize;
        for id in source_file_ids(&datasets, &index, &entry)? {
            if state_of(&consumption, entry.id, id)? == state {
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }

    fn claim(&mut self, consumer: &str, max_files: usize) -> Result<Vec<FileRecord>, SimflowError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let claimed = {
            let datasets = write_txn.open_table(DATASETS).map_err(storage)?;
            let files = write_txn.open_table(FILES).map_err(storage)?;
            let index = write_txn.open_table(DATASET_FILES).map_err(storage)?;
            let mut consumption = write_txn.open_table(CONSUMPTION).map_err(storage)?;

            let entry = dataset_entry(&datasets, consumer)?
                .ok_or_else(|| SimflowError::DatasetNotFound(consumer.to_string()))?;

            let mut claimed = Vec::new();
            for id in source_file_ids(&datasets, &index, &entry)? {
                if claimed.len() >= max_files {
                    break;
                }
                if state_of(&consumption, entry.id, id)? == ConsumptionState::Unyielded {
                    claimed.push(load_file(&files, id)?);
                }
            }

            for file in &claimed {
                consumption
                    .insert((entry.id, file.id.0), ConsumptionState::Yielded.code())
                    .map_err(storage)?;
            }
            claimed
        };
        write_txn.commit().map_err(storage)?;
        Ok(claimed)
    }

    fn confirm(&mut self, consumer: &str, files: &[FileId]) -> Result<(), SimflowError> {
        let files: BTreeSet<FileId> = files.iter().copied().collect();

        // Any early return drops the transaction uncommitted, which aborts it.
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let datasets = write_txn.open_table(DATASETS).map_err(storage)?;
            let file_table = write_txn.open_table(FILES).map_err(storage)?;
            let mut consumption = write_txn.open_table(CONSUMPTION).map_err(storage)?;

            let entry = dataset_entry(&datasets, consumer)?
                .ok_or_else(|| SimflowError::DatasetNotFound(consumer.to_string()))?;

            for &file in &files {
                if file_table.get(file.0).map_err(storage)?.is_none() {
                    return Err(SimflowError::FileNotFound(file));
                }
                let from = state_of(&consumption, entry.id, file)?;
                if from != ConsumptionState::Yielded {
                    return Err(SimflowError::InvalidStateTransition {
                        dataset: consumer.to_string(),
                        file,
                        from,
                        to: ConsumptionState::Consumed,
                    });
                }
            }

            for file in &files {
                consumption
                    .insert((entry.id, file.0), ConsumptionState::Consumed.code())
                    .map_err(storage)?;
            }
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn reset(&mut self, consumer: &str) -> Result<usize, SimflowError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let reset = {
            let datasets = write_txn.open_table(DATASETS).map_err(storage)?;
            let mut consumption = write_txn.open_table(CONSUMPTION).map_err(storage)?;

            let entry = dataset_entry(&datasets, consumer)?
                .ok_or_else(|| SimflowError::DatasetNotFound(consumer.to_string()))?;

            let mut yielded = Vec::new();
            for item in consumption
                .range((entry.id, 0u64)..=(entry.id, u64::MAX))
                .map_err(storage)?
            {
                let (key, value) = item.map_err(storage)?;
                if value.value() == ConsumptionState::Yielded.code() {
                    yielded.push(key.value());
                }
            }
            for key in &yielded {
                consumption.remove(*key).map_err(storage)?;
            }
            yielded.len()
        };
        write_txn.commit().map_err(storage)?;
        Ok(reset)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded(registry: &mut RedbRegistry, n_files: u64) {
        registry.create_dataset("gen", None).expect("create gen");
        registry
            .create_dataset("reco", Some("gen"))
            .expect("create reco");
        for i in 0..n_files {
            registry
                .declare_file(
                    "gen",
                    &PathBuf::from(format!("/data/gen/file_{i}.root")),
                    FileType::Primary,
                    Some(10),
                )
                .expect("declare");
        }
    }

    #[test]
    fn open_creates_empty_registry() {
        let temp = tempdir().expect("temp dir");
        let registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");

        assert!(!registry.has_dataset("gen").expect("has"));
        assert!(registry.list_files("gen", None).expect("list").is_empty());
        assert_eq!(
            registry
                .count_consumption("gen", ConsumptionState::Unyielded)
                .expect("count"),
            0
        );
    }

    #[test]
    fn busy_database_is_retried() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("test.redb");

        let holder = RedbRegistry::open(&path).expect("open db");
        assert!(RedbRegistry::open(&path).is_err());

        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(holder);
        });
        let registry = RedbRegistry::open_with_patience(&path, Duration::from_secs(10))
            .expect("open after release");
        release.join().expect("join");

        assert_eq!(registry.path(), path.as_path());
    }

    #[test]
    fn source_holds_the_file_only_while_a_handle_lives() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("test.redb");
        let mut source = RedbSource::new(&path, Duration::ZERO);

        {
            let mut handle = source.acquire().expect("acquire");
            handle.create_dataset("gen", None).expect("create gen");
            assert!(RedbRegistry::open(&path).is_err());
        }

        let other = RedbRegistry::open(&path).expect("open after drop");
        assert!(other.has_dataset("gen").expect("has"));
        assert!(source.acquire().is_err());
        drop(other);
        assert!(source.acquire().is_ok());
    }

    #[test]
    fn unknown_file_type_code_is_rejected() {
        let temp = tempdir().expect("temp dir");
        let mut registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");
        seeded(&mut registry, 1);

        let write_txn = registry.db.begin_write().expect("begin");
        {
            let mut index = write_txn.open_table(DATASET_FILES).expect("index");
            index.insert((0u64, 99u64), 7u8).expect("insert");
        }
        write_txn.commit().expect("commit");

        assert!(matches!(
            registry.list_files("gen", None),
            Err(SimflowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn claims_do_not_overlap() {
        let temp = tempdir().expect("temp dir");
        let mut registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");
        seeded(&mut registry, 5);

        let first: Vec<_> = registry
            .claim("reco", 3)
            .expect("claim")
            .into_iter()
            .map(|f| f.id)
            .collect();
        let second: Vec<_> = registry
            .claim("reco", 3)
            .expect("claim")
            .into_iter()
            .map(|f| f.id)
            .collect();

        assert_eq!(first, vec![FileId(0), FileId(1), FileId(2)]);
        assert_eq!(second, vec![FileId(3), FileId(4)]);
    }

    #[test]
    fn failed_confirm_leaves_records_untouched() {
        let temp = tempdir().expect("temp dir");
        let mut registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");
        seeded(&mut registry, 3);
        registry.claim("reco", 2).expect("claim");

        let err = registry
            .confirm("reco", &[FileId(0), FileId(2)])
            .expect_err("file 2 was never yielded");
        assert!(matches!(
            err,
            SimflowError::InvalidStateTransition {
                file: FileId(2),
                from: ConsumptionState::Unyielded,
                ..
            }
        ));
        assert_eq!(
            registry
                .count_consumption("reco", ConsumptionState::Yielded)
                .expect("count"),
            2
        );
    }

    #[test]
    fn state_persists_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        // Phase 1: claim and confirm
        {
            let mut registry = RedbRegistry::open(&db_path).expect("open db");
            seeded(&mut registry, 4);
            registry.claim("reco", 2).expect("claim");
            registry.confirm("reco", &[FileId(0)]).expect("confirm");
        }

        // Phase 2: reopen and verify
        {
            let registry = RedbRegistry::open(&db_path).expect("reopen db");
            let count = |state| registry.count_consumption("reco", state).expect("count");
            assert_eq!(count(ConsumptionState::Consumed), 1);
            assert_eq!(count(ConsumptionState::Yielded), 1);
            assert_eq!(count(ConsumptionState::Unyielded), 2);
            assert_eq!(registry.parent("reco").expect("parent").as_deref(), Some("gen"));
        }
    }

    #[test]
    fn file_ids_keep_increasing_across_datasets() {
        let temp = tempdir().expect("temp dir");
        let mut registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");
        seeded(&mut registry, 2);

        let id = registry
            .declare_file("reco", Path::new("/data/reco/a.root"), FileType::Primary, None)
            .expect("declare");
        assert_eq!(id, FileId(2));

        registry.set_nevents(id, 42).expect("set");
        let files = registry.list_files("reco", None).expect("list");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].nevents, Some(42));
    }

    #[test]
    fn drop_dataset_clears_files_and_child_records() {
        let temp = tempdir().expect("temp dir");
        let mut registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");
        seeded(&mut registry, 3);
        registry.claim("reco", 3).expect("claim");

        assert_eq!(registry.drop_dataset("gen").expect("drop"), 3);
        assert_eq!(registry.drop_dataset("gen").expect("drop again"), 0);
        assert!(registry.list_files("gen", None).expect("list").is_empty());
        assert_eq!(registry.reset("reco").expect("reset"), 0);
    }

    #[test]
    fn unknown_file_cannot_be_corrected() {
        let temp = tempdir().expect("temp dir");
        let mut registry = RedbRegistry::open(temp.path().join("test.redb")).expect("open db");

        assert!(matches!(
            registry.set_nevents(FileId(99), 1),
            Err(SimflowError::FileNotFound(FileId(99)))
        ));
    }
}
