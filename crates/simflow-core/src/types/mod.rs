//! # Core Type Definitions
//!
//! This module contains the shared types for the simflow ledger:
//! - File identifiers and records (`FileId`, `FileRecord`, `FileType`)
//! - Consumption lifecycle (`ConsumptionState`)
//! - Error types (`SimflowError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers implement `Ord` so that selections made from
//! `BTreeMap`/`BTreeSet` and redb ranges come out in ascending order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Registry-assigned identifier of a produced file.
///
/// Identifiers are handed out in increasing order as files are declared,
/// and claim order follows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// FILE TYPE
// =============================================================================

/// Kind of output a job produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Primary framework output (type 0). Downstream stages consume these.
    Primary,
    /// Analysis-only output (type 1).
    Analysis,
}

impl FileType {
    /// Numeric code used on the command line and in reports.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            FileType::Primary => 0,
            FileType::Analysis => 1,
        }
    }

    /// Parse a numeric code.
    pub fn from_code(code: u8) -> Result<Self, SimflowError> {
        match code {
            0 => Ok(FileType::Primary),
            1 => Ok(FileType::Analysis),
            other => Err(SimflowError::InvalidConfig(format!(
                "unknown file type {other} (expected 0 or 1)"
            ))),
        }
    }
}

// =============================================================================
// CONSUMPTION STATE
// =============================================================================

/// Where an upstream file stands relative to one consumer dataset.
///
/// Transitions are forward only (`Unyielded -> Yielded -> Consumed`),
/// except for the explicit reset `Yielded -> Unyielded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConsumptionState {
    /// Not yet handed to any job.
    Unyielded,
    /// Handed to a job that has not confirmed completion.
    Yielded,
    /// Confirmed processed.
    Consumed,
}

impl ConsumptionState {
    /// Storage code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            ConsumptionState::Unyielded => 0,
            ConsumptionState::Yielded => 1,
            ConsumptionState::Consumed => 2,
        }
    }

    /// Decode a storage code.
    pub fn from_code(code: u8) -> Result<Self, SimflowError> {
        match code {
            0 => Ok(ConsumptionState::Unyielded),
            1 => Ok(ConsumptionState::Yielded),
            2 => Ok(ConsumptionState::Consumed),
            other => Err(SimflowError::SerializationError(format!(
                "unknown consumption state code {other}"
            ))),
        }
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConsumptionState::Unyielded => "unyielded",
            ConsumptionState::Yielded => "yielded",
            ConsumptionState::Consumed => "consumed",
        }
    }
}

impl fmt::Display for ConsumptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// FILE RECORD
// =============================================================================

/// A file produced by a job and declared to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Registry-assigned identifier.
    pub id: FileId,
    /// Dataset (stage output) this file belongs to.
    pub dataset: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Primary or analysis output.
    pub file_type: FileType,
    /// Number of events, if known.
    pub nevents: Option<u64>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in simflow.
///
/// - No silent failures
/// - Every variant carries the stage, dataset, file or key involved
#[derive(Debug, Error)]
pub enum SimflowError {
    /// A required key or subkey is missing from a stage definition.
    /// For nested keys `stage` is qualified as `name/key`.
    #[error("Error configuring stage: missing keyword {key} in stage {stage}")]
    Config { key: String, stage: String },

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A consumption record is not in the state an operation requires.
    #[error(
        "Invalid state transition for file {file} of consumer {dataset}: \
         {from} -> {to}"
    )]
    InvalidStateTransition {
        dataset: String,
        file: FileId,
        from: ConsumptionState,
        to: ConsumptionState,
    },

    /// Registry contents are inconsistent with each other.
    #[error("Data integrity error in stage {stage}: {detail}")]
    DataIntegrity { stage: String, detail: String },

    /// An external command failed or could not be run.
    #[error("{command} failed (status {status:?}): {stderr}")]
    ExternalTool {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The named stage is not part of the project.
    #[error("Stage {0} not in configuration file")]
    StageNotFound(String),

    /// The named dataset is not registered.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// The file identifier is not registered.
    #[error("File not found: {0}")]
    FileNotFound(FileId),

    /// A dataset was re-registered with a different parent.
    #[error("Dataset {dataset} already registered with parent {existing:?}, requested {requested:?}")]
    DatasetParentMismatch {
        dataset: String,
        existing: Option<String>,
        requested: Option<String>,
    },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O or storage error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl SimflowError {
    /// Build a missing-key error for a top-level stage key.
    pub fn missing(key: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            stage: stage.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_codes() {
        assert_eq!(FileType::Primary.code(), 0);
        assert_eq!(FileType::Analysis.code(), 1);
        assert_eq!(FileType::from_code(1).expect("code"), FileType::Analysis);
        assert!(FileType::from_code(7).is_err());
    }

    #[test]
    fn consumption_state_codes() {
        for state in [
            ConsumptionState::Unyielded,
            ConsumptionState::Yielded,
            ConsumptionState::Consumed,
        ] {
            assert_eq!(
                ConsumptionState::from_code(state.code()).expect("decode"),
                state
            );
        }
        assert!(ConsumptionState::from_code(3).is_err());
    }

    #[test]
    fn config_error_names_key_and_stage() {
        let err = SimflowError::missing("type", "reco/input");
        assert_eq!(
            err.to_string(),
            "Error configuring stage: missing keyword type in stage reco/input"
        );
    }

    #[test]
    fn file_ids_order_ascending() {
        let mut ids = vec![FileId(3), FileId(1), FileId(2)];
        ids.sort();
        assert_eq!(ids, vec![FileId(1), FileId(2), FileId(3)]);
    }
}
