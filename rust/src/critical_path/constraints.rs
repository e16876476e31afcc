//! Constraint resolution on top of dependency-derived dates.
//!
//! Violations are returned as values. They never abort a computation; health
//! classification picks them up.

use chrono::NaiveDate;

use crate::calendar::{finish_for, snap_backward, snap_forward, start_for, Calendar};
use crate::models::{Constraint, ConstraintKind};

use super::types::ConstraintViolation;

/// Dates assigned after applying a constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub start: NaiveDate,
    pub finish: NaiveDate,
    pub violation: Option<ConstraintViolation>,
}

/// Apply `constraint` to a task whose dependencies allow it to start on
/// `earliest_start` (already a working day).
///
/// | kind | effect |
/// |------|--------|
/// | ASAP | none |
/// | SNET | start raised to the date |
/// | SNLT | violation when the start is later than the date |
/// | FNET | finish raised to the date, start derived from it |
/// | FNLT | violation when the finish is later than the date |
/// | MFO  | finish pinned to the date; violation when dependencies need a later start |
pub fn resolve(
    constraint: &Constraint,
    earliest_start: NaiveDate,
    duration: u32,
    calendar: &Calendar,
) -> Resolved {
    let mut start = earliest_start;
    let mut finish = finish_for(start, duration, calendar);
    let mut violation = None;

    let Some(date) = constraint.effective_date() else {
        return Resolved {
            start,
            finish,
            violation,
        };
    };

    match constraint.kind {
        ConstraintKind::Asap => {}
        ConstraintKind::StartNoEarlierThan => {
            let bound = snap_forward(date, calendar);
            if bound > start {
                start = bound;
                finish = finish_for(start, duration, calendar);
            }
        }
        ConstraintKind::StartNoLaterThan => {
            if start > date {
                violation = Some(ConstraintViolation {
                    kind: constraint.kind,
                    date,
                    scheduled: start,
                });
            }
        }
        ConstraintKind::FinishNoEarlierThan => {
            let bound = snap_forward(date, calendar);
            if bound > finish {
                finish = bound;
                start = start_for(finish, duration, calendar);
            }
        }
        ConstraintKind::FinishNoLaterThan => {
            if finish > date {
                violation = Some(ConstraintViolation {
                    kind: constraint.kind,
                    date,
                    scheduled: finish,
                });
            }
        }
        ConstraintKind::MustFinishOn => {
            let pinned_finish = snap_backward(date, calendar);
            let pinned_start = start_for(pinned_finish, duration, calendar);
            if earliest_start > pinned_start {
                violation = Some(ConstraintViolation {
                    kind: constraint.kind,
                    date,
                    scheduled: finish,
                });
            }
            start = pinned_start;
            finish = pinned_finish;
        }
    }

    Resolved {
        start,
        finish,
        violation,
    }
}

/// Cap a late finish by the task's own deadline-type constraint.
///
/// SNLT caps the late start (expressed here through the finish it implies);
/// FNLT and MFO cap the late finish directly.
pub fn cap_late_finish(
    constraint: &Constraint,
    late_finish: NaiveDate,
    duration: u32,
    calendar: &Calendar,
) -> NaiveDate {
    let Some(date) = constraint.effective_date() else {
        return late_finish;
    };
    let cap = match constraint.kind {
        ConstraintKind::StartNoLaterThan => {
            finish_for(snap_backward(date, calendar), duration, calendar)
        }
        ConstraintKind::FinishNoLaterThan | ConstraintKind::MustFinishOn => {
            snap_backward(date, calendar)
        }
        _ => return late_finish,
    };
    late_finish.min(cap)
}
