//! Summary rollup: parents take their dates and status from their children.

use chrono::NaiveDate;

use crate::calendar::{work_days_between, Calendar};
use crate::models::Task;
use crate::tree::ForestIndex;

/// Roll schedule fields up from children into every summary row.
///
/// Summaries are processed deepest-first (reverse preorder), so each one sees
/// its children already rolled up. Rows without schedulable children are left
/// alone.
pub fn rollup_summaries(tasks: &mut [Task], calendar: &Calendar, verbosity: u8) {
    let bottom_up: Vec<(usize, Vec<usize>)> = {
        let index = ForestIndex::new(&*tasks);
        index
            .preorder(tasks.len(), |_| false)
            .into_iter()
            .rev()
            .map(|(i, _)| {
                let kids: Vec<usize> = index
                    .children_of(i)
                    .iter()
                    .copied()
                    .filter(|&c| tasks[c].is_schedulable())
                    .collect();
                (i, kids)
            })
            .filter(|(i, kids)| tasks[*i].is_schedulable() && !kids.is_empty())
            .collect()
    };

    for (parent, kids) in bottom_up {
        let Some(rolled) = Rollup::from_children(kids.iter().map(|&c| &tasks[c]), calendar) else {
            continue;
        };
        log_debug!(
            verbosity,
            task = %tasks[parent].id,
            start = %rolled.start,
            end = %rolled.end,
            "rolled up summary"
        );
        rolled.apply(&mut tasks[parent]);
    }
}

/// Aggregate of a summary's children.
struct Rollup {
    start: NaiveDate,
    end: NaiveDate,
    duration: u32,
    late_start: Option<NaiveDate>,
    late_finish: Option<NaiveDate>,
    total_float: i64,
    free_float: i64,
    is_critical: bool,
    progress: u8,
}

impl Rollup {
    fn from_children<'a>(children: impl Iterator<Item = &'a Task>, calendar: &Calendar) -> Option<Self> {
        let dated: Vec<&Task> = children
            .filter(|c| c.schedule.start.is_some() && c.schedule.end.is_some())
            .collect();
        let start = dated.iter().filter_map(|c| c.schedule.start).min()?;
        let end = dated.iter().filter_map(|c| c.schedule.end).max()?;

        let weight: u64 = dated.iter().map(|c| c.duration.max(1) as u64).sum();
        let done: u64 = dated
            .iter()
            .map(|c| c.duration.max(1) as u64 * c.progress.min(100) as u64)
            .sum();
        let progress = if weight == 0 {
            0
        } else {
            ((done + weight / 2) / weight) as u8
        };

        Some(Self {
            start,
            end,
            duration: work_days_between(start, end, calendar).max(1) as u32,
            late_start: dated.iter().filter_map(|c| c.schedule.late_start).min(),
            late_finish: dated.iter().filter_map(|c| c.schedule.late_finish).max(),
            total_float: dated.iter().map(|c| c.schedule.total_float).min()?,
            free_float: dated.iter().map(|c| c.schedule.free_float).min()?,
            is_critical: dated.iter().any(|c| c.schedule.is_critical),
            progress,
        })
    }

    fn apply(self, task: &mut Task) {
        task.duration = self.duration;
        task.progress = self.progress;
        let s = &mut task.schedule;
        s.start = Some(self.start);
        s.end = Some(self.end);
        s.late_start = self.late_start;
        s.late_finish = self.late_finish;
        s.total_float = self.total_float;
        s.free_float = self.free_float;
        s.is_critical = self.is_critical;
        s.driving_predecessor = None;
    }
}
