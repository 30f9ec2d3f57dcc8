//! # Persistent Storage
//!
//! Disk-backed implementations of the registry traits.

mod redb_registry;

pub use redb_registry::{RedbRegistry, RedbSource};
