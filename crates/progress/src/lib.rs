//! Mission aggregation and progress tracking.
//!
//! Groups tasks into missions, derives each mission's aggregate status, and
//! derives agent metrics for level evaluation.

#![warn(missing_docs)]

pub mod aggregate;
pub mod tracker;
pub mod metrics;

pub use aggregate::{MissionIndex, MissionProgress, MissionView};
pub use tracker::{BasicProgressTracker, MissionSummary, ProgressSnapshot, ProgressTracker};
pub use metrics::derive_metrics;
