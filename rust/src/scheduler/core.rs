//! The schedule engine: one full, pure recomputation per call.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::{Calendar, CalendarError};
use crate::config::EngineConfig;
use crate::critical_path::{calculate_critical_path, ConstraintViolation, CriticalPathError};
use crate::models::{ScheduleFields, Task, TaskId};

use super::health::classify;
use super::rollup::rollup_summaries;

/// Errors that abort a recomputation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    CriticalPath(#[from] CriticalPathError),
}

/// Summary figures of one recomputation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub task_count: usize,
    pub critical_count: usize,
    pub violation_count: usize,
    pub project_start: Option<NaiveDate>,
    pub project_finish: Option<NaiveDate>,
    pub elapsed: Duration,
}

/// Tasks with fresh computed fields, in input order.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleOutcome {
    pub tasks: Vec<Task>,
    pub stats: ScheduleStats,
}

/// Something that can recompute a schedule. The compute channel's worker
/// owns one of these.
pub trait ScheduleCompute: Send + 'static {
    fn compute(&self, tasks: &[Task], calendar: &Calendar) -> Result<ScheduleOutcome, EngineError>;
}

/// The CPM-based engine.
#[derive(Clone, Debug, Default)]
pub struct ScheduleEngine {
    config: EngineConfig,
}

impl ScheduleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate the calendar, run CPM, roll up summaries, classify health.
    pub fn schedule(&self, tasks: &[Task], calendar: &Calendar) -> Result<ScheduleOutcome, EngineError> {
        let started = Instant::now();
        let verbosity = self.config.verbosity;
        calendar.validate()?;

        let refs: Vec<&Task> = tasks.iter().collect();
        let cpm = calculate_critical_path(&refs, calendar, verbosity)?;

        let mut violations: FxHashMap<TaskId, ConstraintViolation> = FxHashMap::default();
        let mut out: Vec<Task> = tasks.to_vec();
        for task in out.iter_mut() {
            task.schedule = ScheduleFields::default();
            let Some(timing) = cpm.get(&task.id) else {
                continue;
            };
            let s = &mut task.schedule;
            s.start = Some(timing.early_start);
            s.end = Some(timing.early_finish);
            s.late_start = Some(timing.late_start);
            s.late_finish = Some(timing.late_finish);
            s.total_float = timing.total_float;
            s.free_float = timing.free_float;
            s.is_critical = timing.is_critical();
            s.driving_predecessor = timing
                .driving_predecessor
                .and_then(|node| cpm.task_id(node))
                .cloned();
            if let Some(violation) = &timing.violation {
                violations.insert(task.id.clone(), violation.clone());
            }
        }

        rollup_summaries(&mut out, calendar, verbosity);

        for task in out.iter_mut() {
            task.schedule.health = classify(
                task,
                violations.get(&task.id),
                self.config.at_risk_float_days,
                calendar,
            );
        }

        let critical_count = out
            .iter()
            .filter(|t| t.is_schedulable() && !cpm.is_summary(&t.id) && t.schedule.is_critical)
            .count();
        for (id, violation) in &violations {
            log_checks!(verbosity, task = %id, "{violation}");
        }

        let stats = ScheduleStats {
            task_count: cpm.len(),
            critical_count,
            violation_count: violations.len(),
            project_start: cpm.project_start,
            project_finish: cpm.project_finish,
            elapsed: started.elapsed(),
        };
        log_changes!(
            verbosity,
            tasks = stats.task_count,
            critical = stats.critical_count,
            violations = stats.violation_count,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "schedule recomputed"
        );

        Ok(ScheduleOutcome { tasks: out, stats })
    }
}

impl ScheduleCompute for ScheduleEngine {
    fn compute(&self, tasks: &[Task], calendar: &Calendar) -> Result<ScheduleOutcome, EngineError> {
        self.schedule(tasks, calendar)
    }
}
