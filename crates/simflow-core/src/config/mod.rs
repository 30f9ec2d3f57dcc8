//! # Configuration
//!
//! Validated, immutable views of the project file.
//!
//! - `StageConfig`: one stage, checked for required keys at construction
//! - `ProjectConfig`: ordered stages, name-keyed lookups, project paths

mod project;
mod stage;

pub use project::*;
pub use stage::*;
