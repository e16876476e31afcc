//! Schedule engine: CPM, summary rollup, and health classification.
//!
//! `ScheduleEngine` is pure: given tasks and a calendar it returns a new task
//! list with every computed field overwritten.

mod core;
pub mod health;
pub mod rollup;

pub use core::{EngineError, ScheduleCompute, ScheduleEngine, ScheduleOutcome, ScheduleStats};
