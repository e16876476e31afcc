//! Local validation. Everything here runs before the store touches state.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::calendar::{Calendar, CalendarError};
use crate::critical_path::{CriticalPathError, ScheduleGraph};
use crate::models::{Dependency, LinkType, RowType, Task, TaskId};
use crate::tree;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task {0} cannot depend on itself")]
    SelfDependency(TaskId),
    #[error("Dependency would create a cycle: {}", format_path(.path))]
    CyclicDependency { path: Vec<TaskId> },
    #[error("Task {task} depends on unknown task {predecessor}")]
    UnknownPredecessor { task: TaskId, predecessor: TaskId },
    #[error("Task {task} cannot depend on blank row {predecessor}")]
    SpacerDependency { task: TaskId, predecessor: TaskId },
    #[error("Task {task} cannot depend on its own parent or child {predecessor}")]
    AncestorDependency { task: TaskId, predecessor: TaskId },
    #[error("Unknown dependency type {0:?} (expected FS, SS, FF or SF)")]
    InvalidLinkType(String),
    #[error("Lag must be a whole number of days within {MAX_LAG_DAYS}, got {0:?}")]
    InvalidLag(String),
    #[error("Task name cannot be empty")]
    EmptyName,
    #[error("Unknown task {0}")]
    UnknownTask(TaskId),
    #[error("Task {0} already exists")]
    DuplicateTask(TaskId),
    #[error("Duration must be at least one work day")]
    InvalidDuration,
    #[error("Progress must be between 0 and 100, got {0}")]
    InvalidProgress(u8),
    #[error("The {field} of summary task {task} is calculated from its subtasks")]
    RolledUpField { task: TaskId, field: &'static str },
    #[error("Task {task} cannot be placed under {parent}")]
    InvalidParent { task: TaskId, parent: TaskId },
    #[error(transparent)]
    InvalidCalendar(#[from] CalendarError),
}

/// Largest lag or lead, in work days, a dependency may carry.
pub const MAX_LAG_DAYS: i64 = 10_000;

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Build a dependency from raw user input.
pub fn parse_dependency(
    predecessor: &str,
    link_type: &str,
    lag: &str,
) -> Result<Dependency, ValidationError> {
    let link_type: LinkType = link_type
        .parse()
        .map_err(|_| ValidationError::InvalidLinkType(link_type.to_string()))?;
    let invalid = || ValidationError::InvalidLag(lag.to_string());
    let days = match lag.trim() {
        "" => 0,
        text => text.parse::<i64>().map_err(|_| invalid())?,
    };
    if !(-MAX_LAG_DAYS..=MAX_LAG_DAYS).contains(&days) {
        return Err(invalid());
    }
    Ok(Dependency::new(predecessor.trim(), link_type, days))
}

pub fn validate_calendar(calendar: &Calendar) -> Result<(), ValidationError> {
    calendar.validate()?;
    Ok(())
}

/// Check `candidate` as it would sit in `tasks` (replacing the task with the
/// same id, or added to the list).
pub fn validate_candidate(candidate: &Task, tasks: &[Arc<Task>]) -> Result<(), ValidationError> {
    let by_id: FxHashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t.as_ref())).collect();

    if candidate.row_type == RowType::Task {
        if candidate.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if candidate.duration == 0 {
            return Err(ValidationError::InvalidDuration);
        }
    }
    if candidate.progress > 100 {
        return Err(ValidationError::InvalidProgress(candidate.progress));
    }

    if let Some(existing) = by_id.get(&candidate.id) {
        if tree::is_parent(tasks, &candidate.id) {
            let field = if existing.duration != candidate.duration {
                Some("duration")
            } else if existing.progress != candidate.progress {
                Some("progress")
            } else {
                None
            };
            if let Some(field) = field {
                return Err(ValidationError::RolledUpField {
                    task: candidate.id.clone(),
                    field,
                });
            }
        }
    }

    let mut projected: Vec<&Task> = tasks
        .iter()
        .map(|t| t.as_ref())
        .filter(|t| t.id != candidate.id)
        .collect();
    projected.push(candidate);

    if let Some(parent) = &candidate.parent_id {
        let invalid = || ValidationError::InvalidParent {
            task: candidate.id.clone(),
            parent: parent.clone(),
        };
        match by_id.get(parent) {
            None => return Err(invalid()),
            Some(p) if !p.is_schedulable() => return Err(invalid()),
            Some(_) => {}
        }
        if tree::is_within(&projected, parent, &candidate.id) {
            return Err(invalid());
        }
    }

    if !candidate.dependencies.is_empty() && !candidate.is_schedulable() {
        return Err(ValidationError::SpacerDependency {
            task: candidate.id.clone(),
            predecessor: candidate.dependencies[0].predecessor.clone(),
        });
    }

    for dep in &candidate.dependencies {
        let predecessor = &dep.predecessor;
        if !(-MAX_LAG_DAYS..=MAX_LAG_DAYS).contains(&dep.lag) {
            return Err(ValidationError::InvalidLag(dep.lag.to_string()));
        }
        if *predecessor == candidate.id {
            return Err(ValidationError::SelfDependency(candidate.id.clone()));
        }
        let Some(pred) = by_id.get(predecessor) else {
            return Err(ValidationError::UnknownPredecessor {
                task: candidate.id.clone(),
                predecessor: predecessor.clone(),
            });
        };
        if !pred.is_schedulable() {
            return Err(ValidationError::SpacerDependency {
                task: candidate.id.clone(),
                predecessor: predecessor.clone(),
            });
        }
        if tree::is_within(&projected, predecessor, &candidate.id)
            || tree::is_within(&projected, &candidate.id, predecessor)
        {
            return Err(ValidationError::AncestorDependency {
                task: candidate.id.clone(),
                predecessor: predecessor.clone(),
            });
        }
    }

    let reparented = by_id
        .get(&candidate.id)
        .map_or(false, |existing| existing.parent_id != candidate.parent_id);
    if reparented {
        check_moved_subtree(&projected, &candidate.id)?;
    }

    check_acyclic(&projected)
}

/// After `moved` changes parent, no dependency touching its subtree may link
/// a row to one of its own ancestors.
fn check_moved_subtree(projected: &[&Task], moved: &TaskId) -> Result<(), ValidationError> {
    let subtree: FxHashSet<&TaskId> = projected
        .iter()
        .map(|t| &t.id)
        .filter(|id| tree::is_within(projected, id, moved))
        .collect();
    for task in projected {
        for dep in &task.dependencies {
            if !subtree.contains(&task.id) && !subtree.contains(&dep.predecessor) {
                continue;
            }
            if tree::is_within(projected, &dep.predecessor, &task.id)
                || tree::is_within(projected, &task.id, &dep.predecessor)
            {
                return Err(ValidationError::AncestorDependency {
                    task: task.id.clone(),
                    predecessor: dep.predecessor.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Reject a task list whose dependency graph has a cycle.
pub fn check_acyclic(tasks: &[&Task]) -> Result<(), ValidationError> {
    match ScheduleGraph::build(tasks) {
        Ok(_) => Ok(()),
        Err(CriticalPathError::CircularDependency { path }) => {
            Err(ValidationError::CyclicDependency { path })
        }
    }
}

/// Whole-project checks for bulk loads: unique ids, then each task in place.
pub fn validate_project(tasks: &[Arc<Task>]) -> Result<(), ValidationError> {
    let mut ids = FxHashSet::default();
    for task in tasks {
        if !ids.insert(&task.id) {
            return Err(ValidationError::DuplicateTask(task.id.clone()));
        }
    }
    for task in tasks {
        validate_candidate(task, tasks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn project() -> Vec<Arc<Task>> {
        vec![
            Arc::new(Task::new("p", "Phase", 1)),
            Arc::new(Task::new("a", "A", 2).with_parent("p")),
            Arc::new(Task::new("b", "B", 2).with_dependency(Dependency::fs("a"))),
            Arc::new(Task::spacer("s")),
        ]
    }

    fn with_dep(id: &str, pred: &str) -> Task {
        let tasks = project();
        let base = tasks
            .iter()
            .find(|t| t.id.as_str() == id)
            .map(|t| t.as_ref().clone())
            .unwrap_or_else(|| Task::new(id, id, 1));
        base.with_dependency(Dependency::fs(pred))
    }

    #[test]
    fn test_valid_dependency_accepted() {
        assert_eq!(validate_candidate(&with_dep("c", "b"), &project()), Ok(()));
    }

    #[test]
    fn test_self_dependency() {
        assert_eq!(
            validate_candidate(&with_dep("b", "b"), &project()),
            Err(ValidationError::SelfDependency("b".into()))
        );
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let err = validate_candidate(&with_dep("a", "b"), &project()).unwrap_err();
        let ValidationError::CyclicDependency { path } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(path.first(), path.last());
        assert!(path.contains(&TaskId::from("a")) && path.contains(&TaskId::from("b")));
    }

    #[test]
    fn test_unknown_and_spacer_predecessors() {
        assert!(matches!(
            validate_candidate(&with_dep("b", "ghost"), &project()),
            Err(ValidationError::UnknownPredecessor { .. })
        ));
        assert!(matches!(
            validate_candidate(&with_dep("b", "s"), &project()),
            Err(ValidationError::SpacerDependency { .. })
        ));
    }

    #[test]
    fn test_ancestor_dependency_rejected() {
        assert!(matches!(
            validate_candidate(&with_dep("a", "p"), &project()),
            Err(ValidationError::AncestorDependency { .. })
        ));
        assert!(matches!(
            validate_candidate(&with_dep("p", "a"), &project()),
            Err(ValidationError::AncestorDependency { .. })
        ));
    }

    #[test]
    fn test_out_of_range_lag_rejected() {
        let tasks = project();
        let task = Task::new("c", "C", 1).with_dependency(Dependency::new("b", LinkType::FS, i64::MAX));
        assert_eq!(
            validate_candidate(&task, &tasks),
            Err(ValidationError::InvalidLag(i64::MAX.to_string()))
        );
        let task = Task::new("c", "C", 1).with_dependency(Dependency::new("b", LinkType::SS, i64::MIN));
        assert!(matches!(
            validate_candidate(&task, &tasks),
            Err(ValidationError::InvalidLag(_))
        ));
    }

    #[test]
    fn test_field_rules() {
        let tasks = project();
        let mut task = Task::new("c", "  ", 1);
        assert_eq!(validate_candidate(&task, &tasks), Err(ValidationError::EmptyName));
        task.name = "C".into();
        task.duration = 0;
        assert_eq!(validate_candidate(&task, &tasks), Err(ValidationError::InvalidDuration));
        task.duration = 1;
        task.progress = 120;
        assert_eq!(validate_candidate(&task, &tasks), Err(ValidationError::InvalidProgress(120)));
        task.progress = 0;
        task.parent_id = Some("s".into());
        assert!(matches!(
            validate_candidate(&task, &tasks),
            Err(ValidationError::InvalidParent { .. })
        ));
    }

    #[test]
    fn test_move_under_dependent_rejected() {
        let tasks = project();
        // b depends on a; putting a under b would tie b to its own child.
        let moved = tasks[1].as_ref().clone().with_parent("b");
        assert_eq!(
            validate_candidate(&moved, &tasks),
            Err(ValidationError::AncestorDependency {
                task: "b".into(),
                predecessor: "a".into(),
            })
        );
        // And the other way round: b under its predecessor's parent chain.
        let moved = tasks[2].as_ref().clone().with_parent("a");
        assert!(matches!(
            validate_candidate(&moved, &tasks),
            Err(ValidationError::AncestorDependency { .. })
        ));
        let moved = tasks[2].as_ref().clone().with_parent("p");
        assert_eq!(validate_candidate(&moved, &tasks), Ok(()));
    }

    #[test]
    fn test_summary_rollup_fields_are_read_only() {
        let tasks = project();
        let mut summary = tasks[0].as_ref().clone();
        summary.progress = 40;
        assert_eq!(
            validate_candidate(&summary, &tasks),
            Err(ValidationError::RolledUpField {
                task: "p".into(),
                field: "progress",
            })
        );
        summary.progress = tasks[0].progress;
        summary.duration = 9;
        assert!(matches!(
            validate_candidate(&summary, &tasks),
            Err(ValidationError::RolledUpField { field: "duration", .. })
        ));
        summary.duration = tasks[0].duration;
        summary.name = "Renamed".into();
        assert_eq!(validate_candidate(&summary, &tasks), Ok(()));
    }

    #[test]
    fn test_parent_cannot_be_own_descendant() {
        let tasks = project();
        let moved = tasks[0].as_ref().clone().with_parent("a");
        assert!(matches!(
            validate_candidate(&moved, &tasks),
            Err(ValidationError::InvalidParent { .. })
        ));
    }

    #[rstest]
    #[case("a", "fs", "2", Ok(Dependency::new("a", LinkType::FS, 2)))]
    #[case("a", "SF", "", Ok(Dependency::new("a", LinkType::SF, 0)))]
    #[case("a", "SF", "-1", Ok(Dependency::new("a", LinkType::SF, -1)))]
    #[case("a", "XY", "0", Err(ValidationError::InvalidLinkType("XY".into())))]
    #[case("a", "FS", "two", Err(ValidationError::InvalidLag("two".into())))]
    #[case("a", "FS", "1.5", Err(ValidationError::InvalidLag("1.5".into())))]
    #[case("a", "FS", "-10000", Ok(Dependency::new("a", LinkType::FS, -10_000)))]
    #[case("a", "FS", "10001", Err(ValidationError::InvalidLag("10001".into())))]
    #[case("a", "FS", "9223372036854775807", Err(ValidationError::InvalidLag("9223372036854775807".into())))]
    fn test_parse_dependency(
        #[case] pred: &str,
        #[case] link: &str,
        #[case] lag: &str,
        #[case] expected: Result<Dependency, ValidationError>,
    ) {
        assert_eq!(parse_dependency(pred, link, lag), expected);
    }

    #[test]
    fn test_project_duplicate_ids() {
        let mut tasks = project();
        tasks.push(Arc::new(Task::new("a", "Again", 1)));
        assert_eq!(
            validate_project(&tasks),
            Err(ValidationError::DuplicateTask("a".into()))
        );
        assert_eq!(validate_project(&project()), Ok(()));
    }
}
