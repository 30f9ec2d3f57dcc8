//! # simflow-core
//!
//! Bookkeeping for staged simulation pipelines run as batch job arrays.
//!
//! The crate knows nothing about the batch system itself. It covers:
//! - `config`: the validated project and stage configuration
//! - `registry`: the file and consumption ledger, with an in-memory backend
//! - `storage`: the redb-backed ledger shared by concurrent jobs
//! - `tracking`: file hand-off between stages and completion estimates
//!
//! Everything here is synchronous. Submitting and polling jobs lives in the
//! `simflow` application crate.

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod registry;
pub mod storage;
pub mod tracking;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{ConsumptionState, FileId, FileRecord, FileType, SimflowError};

// =============================================================================
// RE-EXPORTS: Configuration
// =============================================================================

pub use config::{ProjectConfig, SchedulerSettings, StageConfig};

// =============================================================================
// RE-EXPORTS: Registry and Tracking
// =============================================================================

pub use registry::{DatasetRegistry, MemoryRegistry, RegistrySource};
pub use storage::{RedbRegistry, RedbSource};
pub use tracking::{
    CompletionEvaluator, CompletionReport, ConsumptionCounts, ConsumptionTracker, Target,
};
