//! Types for critical path calculation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interner::{NodeId, TaskIdInterner};
use crate::models::{ConstraintKind, LinkType, TaskId};

/// Error types for critical path calculation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriticalPathError {
    /// The dependency graph is not acyclic. `path` starts and ends on the
    /// same task.
    #[error("Circular dependency detected: {}", format_path(.path))]
    CircularDependency { path: Vec<TaskId> },
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A directed precedence edge. `node` is the other end: the predecessor in
/// an incoming list, the successor in an outgoing list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub node: NodeId,
    pub link_type: LinkType,
    pub lag: i64,
}

/// A constraint whose date could not be honored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    pub date: NaiveDate,
    /// The start or finish the dependencies actually produced.
    pub scheduled: NaiveDate,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let which = match self.kind {
            ConstraintKind::StartNoLaterThan => "start",
            _ => "finish",
        };
        write!(
            f,
            "{} {} violated: dependencies push {} to {}",
            self.kind.label(),
            self.date,
            which,
            self.scheduled
        )
    }
}

/// Per-task timing from the forward and backward passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskTiming {
    pub early_start: NaiveDate,
    pub early_finish: NaiveDate,
    pub late_start: NaiveDate,
    pub late_finish: NaiveDate,
    /// Work days between early and late start; negative when a deadline is
    /// violated.
    pub total_float: i64,
    pub free_float: i64,
    /// First incoming edge (in stored order) that set the early date.
    pub driving_predecessor: Option<NodeId>,
    pub violation: Option<ConstraintViolation>,
}

impl TaskTiming {
    pub(crate) fn new(start: NaiveDate, finish: NaiveDate) -> Self {
        Self {
            early_start: start,
            early_finish: finish,
            late_start: start,
            late_finish: finish,
            total_float: 0,
            free_float: 0,
            driving_predecessor: None,
            violation: None,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.total_float <= 0
    }
}

/// Result of a CPM run over one task graph.
#[derive(Clone, Debug)]
pub struct CriticalPathResult {
    pub(crate) interner: TaskIdInterner,
    /// Timings indexed by node number.
    pub timings: Vec<TaskTiming>,
    /// Whether each node is a summary (has schedulable children).
    pub summaries: Vec<bool>,
    pub project_start: Option<NaiveDate>,
    pub project_finish: Option<NaiveDate>,
}

impl CriticalPathResult {
    pub fn get(&self, id: &TaskId) -> Option<&TaskTiming> {
        self.interner
            .get(id)
            .and_then(|node| self.timings.get(node as usize))
    }

    pub fn task_id(&self, node: NodeId) -> Option<&TaskId> {
        self.interner.resolve(node)
    }

    pub fn is_summary(&self, id: &TaskId) -> bool {
        self.interner
            .get(id)
            .is_some_and(|node| self.summaries[node as usize])
    }

    /// Ids of leaf tasks with zero or negative total float.
    pub fn critical_tasks(&self) -> Vec<&TaskId> {
        self.timings
            .iter()
            .enumerate()
            .filter(|(node, timing)| !self.summaries[*node] && timing.is_critical())
            .filter_map(|(node, _)| self.interner.resolve(node as NodeId))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_task_timing_critical() {
        let mut timing = TaskTiming::new(make_date(2024, 1, 1), make_date(2024, 1, 3));
        assert!(timing.is_critical());
        timing.total_float = 2;
        assert!(!timing.is_critical());
        timing.total_float = -1;
        assert!(timing.is_critical());
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = CriticalPathError::CircularDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_violation_message() {
        let violation = ConstraintViolation {
            kind: ConstraintKind::MustFinishOn,
            date: make_date(2024, 1, 5),
            scheduled: make_date(2024, 1, 9),
        };
        assert_eq!(
            violation.to_string(),
            "must finish on 2024-01-05 violated: dependencies push finish to 2024-01-09"
        );
    }
}
