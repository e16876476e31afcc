//! Critical path calculation using forward and backward passes.

use chrono::NaiveDate;

use crate::calendar::{
    add_work_days, finish_for, snap_backward, snap_forward, start_for, work_days_between,
    work_days_difference, Calendar,
};
use crate::interner::NodeId;
use crate::models::{LinkType, SchedulingMode, Task};

use super::constraints::{cap_late_finish, resolve};
use super::graph::ScheduleGraph;
use super::types::{CriticalPathError, CriticalPathResult, Edge, TaskTiming};

/// Run the forward and backward passes over the schedulable rows of `tasks`.
///
/// Summary rows get the span of their children in the forward pass and a
/// late finish bound in the backward pass; their remaining fields are rolled
/// up by the scheduler.
pub fn calculate_critical_path(
    tasks: &[&Task],
    calendar: &Calendar,
    verbosity: u8,
) -> Result<CriticalPathResult, CriticalPathError> {
    let graph = ScheduleGraph::build(tasks)?;
    let anchor = snap_forward(calendar.project_start, calendar);

    let mut timings: Vec<Option<TaskTiming>> = vec![None; graph.len()];
    forward_pass(&graph, calendar, anchor, &mut timings, verbosity);

    let mut timings: Vec<TaskTiming> = timings
        .into_iter()
        .map(|t| t.unwrap_or_else(|| TaskTiming::new(anchor, anchor)))
        .collect();

    let project_start = timings.iter().map(|t| t.early_start).min();
    let project_finish = timings.iter().map(|t| t.early_finish).max();

    if let Some(finish) = project_finish {
        backward_pass(&graph, calendar, finish, &mut timings, verbosity);
        compute_float(&graph, calendar, &mut timings);
    }

    log_changes!(
        verbosity,
        tasks = graph.len(),
        ?project_start,
        ?project_finish,
        "critical path computed"
    );

    let summaries = (0..graph.len() as NodeId)
        .map(|n| graph.is_summary(n))
        .collect();
    Ok(CriticalPathResult {
        interner: graph.interner,
        timings,
        summaries,
        project_start,
        project_finish,
    })
}

/// Earliest start a single edge allows for a successor of `duration` days.
fn edge_start_bound(
    edge: &Edge,
    pred: &TaskTiming,
    duration: u32,
    calendar: &Calendar,
) -> NaiveDate {
    match edge.link_type {
        LinkType::FS => add_work_days(pred.early_finish, edge.lag.saturating_add(1), calendar),
        LinkType::SS => add_work_days(pred.early_start, edge.lag, calendar),
        LinkType::FF => start_for(
            add_work_days(pred.early_finish, edge.lag, calendar),
            duration,
            calendar,
        ),
        LinkType::SF => start_for(
            add_work_days(pred.early_start, edge.lag, calendar),
            duration,
            calendar,
        ),
    }
}

fn forward_pass(
    graph: &ScheduleGraph,
    calendar: &Calendar,
    anchor: NaiveDate,
    timings: &mut [Option<TaskTiming>],
    verbosity: u8,
) {
    for &node in &graph.order {
        let idx = node as usize;
        let data = &graph.nodes[idx];

        if graph.is_summary(node) {
            let spans: Vec<(NaiveDate, NaiveDate)> = graph.children[idx]
                .iter()
                .filter_map(|&c| timings[c as usize].as_ref())
                .map(|t| (t.early_start, t.early_finish))
                .collect();
            let start = spans.iter().map(|(s, _)| *s).min().unwrap_or(anchor);
            let finish = spans.iter().map(|(_, f)| *f).max().unwrap_or(anchor);
            timings[idx] = Some(TaskTiming::new(start, finish));
            continue;
        }

        if data.mode == SchedulingMode::Manual {
            let start = snap_forward(data.manual_start.unwrap_or(anchor), calendar);
            let finish = finish_for(start, data.duration, calendar);
            timings[idx] = Some(TaskTiming::new(start, finish));
            continue;
        }

        // First edge in stored order with the maximal bound drives the task.
        let mut best: Option<(NaiveDate, NodeId)> = None;
        for edge in &graph.predecessors[idx] {
            let Some(pred) = timings[edge.node as usize].as_ref() else {
                continue;
            };
            let bound = edge_start_bound(edge, pred, data.duration, calendar);
            log_debug!(
                verbosity,
                task = %graph.task_id(node).map(|t| t.as_str()).unwrap_or("?"),
                predecessor = %graph.task_id(edge.node).map(|t| t.as_str()).unwrap_or("?"),
                link = %edge.link_type,
                %bound,
                "forward edge"
            );
            if best.map_or(true, |(date, _)| bound > date) {
                best = Some((bound, edge.node));
            }
        }

        let (dependency_start, mut driving) = match best {
            Some((date, pred)) if date >= anchor => (date, Some(pred)),
            _ => (anchor, None),
        };

        let resolved = resolve(&data.constraint, dependency_start, data.duration, calendar);
        if resolved.start != dependency_start {
            driving = None;
        }
        if let Some(violation) = &resolved.violation {
            log_checks!(
                verbosity,
                task = %graph.task_id(node).map(|t| t.as_str()).unwrap_or("?"),
                "{violation}"
            );
        }

        let mut timing = TaskTiming::new(resolved.start, resolved.finish);
        timing.driving_predecessor = driving;
        timing.violation = resolved.violation;
        timings[idx] = Some(timing);
    }
}

/// Latest finish a single outgoing edge allows for a predecessor.
fn edge_finish_bound(
    edge: &Edge,
    succ: &TaskTiming,
    duration: u32,
    calendar: &Calendar,
) -> NaiveDate {
    match edge.link_type {
        LinkType::FS => {
            add_work_days(succ.late_start, edge.lag.saturating_add(1).saturating_neg(), calendar)
        }
        LinkType::SS => finish_for(
            add_work_days(succ.late_start, edge.lag.saturating_neg(), calendar),
            duration,
            calendar,
        ),
        LinkType::FF => add_work_days(succ.late_finish, edge.lag.saturating_neg(), calendar),
        LinkType::SF => finish_for(
            add_work_days(succ.late_finish, edge.lag.saturating_neg(), calendar),
            duration,
            calendar,
        ),
    }
}

fn backward_pass(
    graph: &ScheduleGraph,
    calendar: &Calendar,
    project_finish: NaiveDate,
    timings: &mut [TaskTiming],
    verbosity: u8,
) {
    for &node in graph.order.iter().rev() {
        let idx = node as usize;
        let data = &graph.nodes[idx];
        let duration = if graph.is_summary(node) {
            let t = &timings[idx];
            work_days_between(t.early_start, t.early_finish, calendar).max(1) as u32
        } else {
            data.duration
        };

        let mut late_finish = project_finish;
        if let Some(parent) = graph.parent[idx] {
            late_finish = late_finish.min(timings[parent as usize].late_finish);
        }
        for edge in &graph.successors[idx] {
            let bound = edge_finish_bound(edge, &timings[edge.node as usize], duration, calendar);
            log_debug!(
                verbosity,
                task = %graph.task_id(node).map(|t| t.as_str()).unwrap_or("?"),
                successor = %graph.task_id(edge.node).map(|t| t.as_str()).unwrap_or("?"),
                %bound,
                "backward edge"
            );
            late_finish = late_finish.min(bound);
        }
        late_finish = cap_late_finish(&data.constraint, late_finish, duration, calendar);
        let late_finish = snap_backward(late_finish, calendar);

        let timing = &mut timings[idx];
        timing.late_finish = late_finish;
        timing.late_start = start_for(late_finish, duration, calendar);
    }
}

fn compute_float(graph: &ScheduleGraph, calendar: &Calendar, timings: &mut [TaskTiming]) {
    for idx in 0..graph.len() {
        let total = work_days_difference(timings[idx].early_start, timings[idx].late_start, calendar);

        let free = graph.successors[idx]
            .iter()
            .map(|edge| {
                let me = &timings[idx];
                let succ = &timings[edge.node as usize];
                match edge.link_type {
                    LinkType::FS => work_days_difference(
                        add_work_days(me.early_finish, edge.lag.saturating_add(1), calendar),
                        succ.early_start,
                        calendar,
                    ),
                    LinkType::SS => work_days_difference(
                        add_work_days(me.early_start, edge.lag, calendar),
                        succ.early_start,
                        calendar,
                    ),
                    LinkType::FF => work_days_difference(
                        add_work_days(me.early_finish, edge.lag, calendar),
                        succ.early_finish,
                        calendar,
                    ),
                    LinkType::SF => work_days_difference(
                        add_work_days(me.early_start, edge.lag, calendar),
                        succ.early_finish,
                        calendar,
                    ),
                }
            })
            .min()
            .unwrap_or(total);

        let timing = &mut timings[idx];
        timing.total_float = total;
        timing.free_float = free.min(total).max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Constraint, ConstraintKind, Dependency, TaskId};

    fn make_date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar() -> Calendar {
        Calendar::weekdays(make_date(2024, 1, 1))
    }

    fn run(tasks: &[Task]) -> CriticalPathResult {
        let refs: Vec<&Task> = tasks.iter().collect();
        calculate_critical_path(&refs, &calendar(), 0).unwrap()
    }

    fn timing<'a>(result: &'a CriticalPathResult, id: &str) -> &'a TaskTiming {
        result.get(&TaskId::from(id)).unwrap()
    }

    #[test]
    fn test_finish_to_start_chain() {
        let tasks = [
            Task::new("a", "A", 3),
            Task::new("b", "B", 5).with_dependency(Dependency::fs("a")),
        ];
        let result = run(&tasks);
        let a = timing(&result, "a");
        let b = timing(&result, "b");
        assert_eq!((a.early_start, a.early_finish), (make_date(2024, 1, 1), make_date(2024, 1, 3)));
        assert_eq!((b.early_start, b.early_finish), (make_date(2024, 1, 4), make_date(2024, 1, 10)));
        assert!(a.is_critical() && b.is_critical());
        assert_eq!(result.project_finish, Some(make_date(2024, 1, 10)));
        assert_eq!(
            result.task_id(b.driving_predecessor.unwrap()),
            Some(&TaskId::from("a"))
        );
    }

    #[test]
    fn test_float_on_parallel_branch() {
        let tasks = [
            Task::new("a", "A", 2),
            Task::new("b", "B", 3).with_dependency(Dependency::fs("a")),
            Task::new("c", "C", 1),
        ];
        let result = run(&tasks);
        let c = timing(&result, "c");
        assert_eq!(c.late_finish, make_date(2024, 1, 5));
        assert_eq!(c.late_start, make_date(2024, 1, 5));
        assert_eq!(c.total_float, 4);
        assert_eq!(c.free_float, 4);
        let critical: Vec<&str> = result.critical_tasks().iter().map(|t| t.as_str()).collect();
        assert_eq!(critical, vec!["a", "b"]);
    }

    #[test]
    fn test_link_types_and_lag() {
        let tasks = [
            Task::new("a", "A", 3),
            Task::new("ss", "SS", 2).with_dependency(Dependency::new("a", LinkType::SS, 1)),
            Task::new("ff", "FF", 2).with_dependency(Dependency::new("a", LinkType::FF, 2)),
            Task::new("sf", "SF", 2).with_dependency(Dependency::new("a", LinkType::SF, 3)),
            Task::new("lag", "Lag", 1).with_dependency(Dependency::new("a", LinkType::FS, 2)),
            Task::new("lead", "Lead", 1).with_dependency(Dependency::new("a", LinkType::FS, -1)),
        ];
        let result = run(&tasks);
        // a: Mon 1st .. Wed 3rd
        assert_eq!(timing(&result, "ss").early_start, make_date(2024, 1, 2));
        // ff must finish on or after Fri 5th.
        assert_eq!(timing(&result, "ff").early_finish, make_date(2024, 1, 5));
        // sf must finish on or after Thu 4th.
        assert_eq!(timing(&result, "sf").early_finish, make_date(2024, 1, 4));
        assert_eq!(timing(&result, "lag").early_start, make_date(2024, 1, 8));
        assert_eq!(timing(&result, "lead").early_start, make_date(2024, 1, 3));
    }

    #[test]
    fn test_critical_delay_moves_finish_and_float_task_does_not() {
        let base = [
            Task::new("a", "A", 2),
            Task::new("b", "B", 3).with_dependency(Dependency::fs("a")),
            Task::new("c", "C", 1),
        ];
        let finish = run(&base).project_finish.unwrap();
        assert_eq!(finish, make_date(2024, 1, 5));

        let mut delayed = base.clone();
        delayed[0].duration += 1;
        assert_eq!(
            run(&delayed).project_finish,
            Some(add_work_days(finish, 1, &calendar()))
        );

        let pushed = [
            base[0]
                .clone()
                .with_constraint(Constraint::new(ConstraintKind::StartNoEarlierThan, make_date(2024, 1, 2))),
            base[1].clone(),
            base[2].clone(),
        ];
        assert_eq!(run(&pushed).project_finish, Some(make_date(2024, 1, 8)));

        assert!(timing(&run(&base), "c").total_float > 0);
        let without_c = &base[..2];
        assert_eq!(run(without_c).project_finish, Some(finish));
    }

    #[test]
    fn test_largest_lag_schedules() {
        let tasks = [
            Task::new("a", "A", 1),
            Task::new("b", "B", 1).with_dependency(Dependency::new("a", LinkType::FS, 10_000)),
            Task::new("c", "C", 1).with_dependency(Dependency::new("a", LinkType::SS, -10_000)),
        ];
        let result = run(&tasks);
        let a = timing(&result, "a");
        assert_eq!(
            timing(&result, "b").early_start,
            add_work_days(a.early_finish, 10_001, &calendar())
        );
        assert_eq!(timing(&result, "c").early_start, make_date(2024, 1, 1));
    }

    #[test]
    fn test_successor_respects_every_edge() {
        let tasks = [
            Task::new("a", "A", 2),
            Task::new("b", "B", 4),
            Task::new("c", "C", 1)
                .with_dependency(Dependency::fs("a"))
                .with_dependency(Dependency::fs("b")),
        ];
        let result = run(&tasks);
        let c = timing(&result, "c");
        for pred in ["a", "b"] {
            assert!(c.early_start > timing(&result, pred).early_finish);
        }
        assert_eq!(result.task_id(c.driving_predecessor.unwrap()), Some(&TaskId::from("b")));
    }

    #[test]
    fn test_driving_predecessor_is_first_of_ties() {
        let tasks = [
            Task::new("a", "A", 2),
            Task::new("b", "B", 2),
            Task::new("c", "C", 1)
                .with_dependency(Dependency::fs("b"))
                .with_dependency(Dependency::fs("a")),
        ];
        let result = run(&tasks);
        let c = timing(&result, "c");
        assert_eq!(result.task_id(c.driving_predecessor.unwrap()), Some(&TaskId::from("b")));
    }

    #[test]
    fn test_manual_task_ignores_dependencies() {
        let tasks = [
            Task::new("a", "A", 5),
            Task::new("m", "M", 2)
                .with_dependency(Dependency::fs("a"))
                .with_manual_start(make_date(2024, 1, 6)),
        ];
        let result = run(&tasks);
        // Saturday snaps to Monday.
        assert_eq!(timing(&result, "m").early_start, make_date(2024, 1, 8));
    }

    #[test]
    fn test_deadline_violation_gives_negative_float() {
        let tasks = [
            Task::new("a", "A", 5),
            Task::new("b", "B", 2)
                .with_dependency(Dependency::fs("a"))
                .with_constraint(Constraint::new(
                    ConstraintKind::FinishNoLaterThan,
                    make_date(2024, 1, 5),
                )),
        ];
        let result = run(&tasks);
        let b = timing(&result, "b");
        assert!(b.violation.is_some());
        assert_eq!(b.late_finish, make_date(2024, 1, 5));
        assert!(b.total_float < 0);
        assert!(timing(&result, "a").total_float < 0);
        assert_eq!(b.free_float, 0);
    }

    #[test]
    fn test_summary_spans_children_and_bounds_them() {
        let tasks = [
            Task::new("a", "A", 2),
            Task::new("p", "P", 1).with_dependency(Dependency::fs("a")),
            Task::new("x", "X", 3).with_parent("p"),
            Task::new("y", "Y", 1).with_parent("p"),
            Task::new("z", "Z", 1).with_dependency(Dependency::fs("p")),
        ];
        let result = run(&tasks);
        assert!(result.is_summary(&"p".into()));
        let p = timing(&result, "p");
        assert_eq!(p.early_start, make_date(2024, 1, 3));
        assert_eq!(p.early_finish, make_date(2024, 1, 5));
        assert_eq!(timing(&result, "z").early_start, make_date(2024, 1, 8));
        // y has slack inside the summary but cannot finish after z needs it.
        let y = timing(&result, "y");
        assert_eq!(y.late_finish, make_date(2024, 1, 5));
        assert_eq!(y.total_float, 2);
    }

    #[test]
    fn test_project_start_anchor_snaps_forward() {
        let tasks = [Task::new("a", "A", 1)];
        let refs: Vec<&Task> = tasks.iter().collect();
        let cal = Calendar::weekdays(make_date(2024, 1, 6));
        let result = calculate_critical_path(&refs, &cal, 0).unwrap();
        assert_eq!(result.project_start, Some(make_date(2024, 1, 8)));
    }

    #[test]
    fn test_empty_project() {
        let result = run(&[]);
        assert!(result.is_empty());
        assert_eq!(result.project_finish, None);
    }
}
