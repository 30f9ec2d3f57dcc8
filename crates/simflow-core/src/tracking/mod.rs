//! # Tracking
//!
//! Stage progress as seen through the registry:
//! - [`ConsumptionTracker`] hands upstream files to downstream jobs
//! - [`CompletionEvaluator`] compares produced events against targets

mod completion;
mod consumption;

pub use completion::{
    CompletionEvaluator, CompletionReport, Produced, StageTargets, Target, TypeProgress,
};
pub use consumption::{ConsumptionCounts, ConsumptionTracker, consumption_counts};
