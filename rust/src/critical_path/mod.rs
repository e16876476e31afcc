//! Critical path method over the task forest.
//!
//! Builds an interned dependency graph, runs calendar-aware forward and
//! backward passes, and reports early/late dates, float, and constraint
//! violations per task.

mod calculation;
pub mod constraints;
pub mod graph;
mod types;

pub use calculation::calculate_critical_path;
pub use constraints::{resolve, Resolved};
pub use graph::ScheduleGraph;
pub use types::{ConstraintViolation, CriticalPathError, CriticalPathResult, Edge, TaskTiming};
