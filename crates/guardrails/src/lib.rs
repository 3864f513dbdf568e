//! Agent permission matrix and autonomy-level evaluation.

#![warn(missing_docs)]

pub mod matrix;
pub mod engine;
pub mod level;

pub use matrix::{Action, PermissionResult};
pub use engine::{PermissionCheck, PermissionEngine};
pub use level::{LevelChange, LevelEvaluator, LevelMetrics, PromotionThreshold};
