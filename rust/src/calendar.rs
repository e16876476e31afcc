//! Work calendar and calendar-aware date arithmetic.
//!
//! Every date shift in the engine goes through the functions in this module;
//! nothing else adds raw calendar days to a task date.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on days scanned while looking for the next working day.
/// A valid calendar has a working weekday, so a scan never needs more than
/// a week beyond the last exception; this only guards malformed input.
const MAX_SCAN_DAYS: u32 = 366 * 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Calendar has no working days")]
    NoWorkingDays,
    #[error("Invalid weekday index {0} (expected 0=Sunday..6=Saturday)")]
    InvalidWeekday(u8),
}

/// Weekly working pattern plus per-date overrides.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Calendar {
    /// Working weekday indices, 0 = Sunday .. 6 = Saturday.
    pub working_days: BTreeSet<u8>,
    /// Exact-date overrides: true = working, false = non-working.
    #[serde(default)]
    pub exceptions: BTreeMap<NaiveDate, bool>,
    /// Anchor for tasks with no predecessors and no constraint.
    pub project_start: NaiveDate,
}

impl Calendar {
    /// Monday–Friday calendar with no exceptions.
    pub fn weekdays(project_start: NaiveDate) -> Self {
        Self {
            working_days: (1..=5).collect(),
            exceptions: BTreeMap::new(),
            project_start,
        }
    }

    pub fn with_exception(mut self, date: NaiveDate, working: bool) -> Self {
        self.exceptions.insert(date, working);
        self
    }

    pub fn validate(&self) -> Result<(), CalendarError> {
        if let Some(&bad) = self.working_days.iter().find(|&&d| d > 6) {
            return Err(CalendarError::InvalidWeekday(bad));
        }
        if self.working_days.is_empty() {
            return Err(CalendarError::NoWorkingDays);
        }
        Ok(())
    }
}

/// Whether `date` is a working day. Exceptions override the weekly pattern.
pub fn is_working_day(date: NaiveDate, calendar: &Calendar) -> bool {
    if let Some(&working) = calendar.exceptions.get(&date) {
        return working;
    }
    let weekday = date.weekday().num_days_from_sunday() as u8;
    calendar.working_days.contains(&weekday)
}

/// `date` if it is a working day, otherwise the next working day after it.
pub fn snap_forward(date: NaiveDate, calendar: &Calendar) -> NaiveDate {
    let mut current = date;
    for _ in 0..MAX_SCAN_DAYS {
        if is_working_day(current, calendar) {
            return current;
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    date
}

/// `date` if it is a working day, otherwise the previous working day before it.
pub fn snap_backward(date: NaiveDate, calendar: &Calendar) -> NaiveDate {
    let mut current = date;
    for _ in 0..MAX_SCAN_DAYS {
        if is_working_day(current, calendar) {
            return current;
        }
        match current.pred_opt() {
            Some(prev) => current = prev,
            None => break,
        }
    }
    date
}

/// Shift `date` by `n` working days (negative `n` moves backward).
///
/// `n == 0` snaps forward to a working day. For `n != 0` the start date
/// itself is not counted, so `add_work_days(d, 1)` is the next working day.
pub fn add_work_days(date: NaiveDate, n: i64, calendar: &Calendar) -> NaiveDate {
    if n == 0 {
        return snap_forward(date, calendar);
    }
    let mut current = date;
    let mut remaining = n.unsigned_abs();
    let mut scanned: u64 = 0;
    while remaining > 0 {
        let step = if n > 0 {
            current.succ_opt()
        } else {
            current.pred_opt()
        };
        current = match step {
            Some(d) => d,
            None => return current,
        };
        if is_working_day(current, calendar) {
            remaining -= 1;
            scanned = 0;
        } else {
            scanned += 1;
            if scanned > MAX_SCAN_DAYS as u64 {
                return current;
            }
        }
    }
    current
}

/// Inclusive count of working days in `[a, b]`; 0 when `b < a`.
pub fn work_days_between(a: NaiveDate, b: NaiveDate, calendar: &Calendar) -> i64 {
    if b < a {
        return 0;
    }
    a.iter_days()
        .take_while(|d| *d <= b)
        .filter(|d| is_working_day(*d, calendar))
        .count() as i64
}

/// Signed working-day distance from `a` to `b`.
///
/// Counts the working days in `(a, b]` (negated when `b < a`), so for working
/// days `add_work_days(a, work_days_difference(a, b)) == b`.
pub fn work_days_difference(a: NaiveDate, b: NaiveDate, calendar: &Calendar) -> i64 {
    match b.cmp(&a) {
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => {
            let working_a = is_working_day(a, calendar) as i64;
            work_days_between(a, b, calendar) - working_a
        }
        std::cmp::Ordering::Less => {
            let working_b = is_working_day(b, calendar) as i64;
            -(work_days_between(b, a, calendar) - working_b)
        }
    }
}

/// Finish date of a task of `duration` work days starting on `start`.
pub fn finish_for(start: NaiveDate, duration: u32, calendar: &Calendar) -> NaiveDate {
    add_work_days(start, duration.max(1) as i64 - 1, calendar)
}

/// Start date of a task of `duration` work days finishing on `finish`.
pub fn start_for(finish: NaiveDate, duration: u32, calendar: &Calendar) -> NaiveDate {
    let finish = snap_backward(finish, calendar);
    add_work_days(finish, -(duration.max(1) as i64 - 1), calendar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn make_date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar() -> Calendar {
        Calendar::weekdays(make_date(2024, 1, 1))
    }

    #[test]
    fn test_weekly_pattern() {
        let cal = calendar();
        assert!(is_working_day(make_date(2024, 1, 1), &cal)); // Monday
        assert!(is_working_day(make_date(2024, 1, 5), &cal)); // Friday
        assert!(!is_working_day(make_date(2024, 1, 6), &cal)); // Saturday
        assert!(!is_working_day(make_date(2024, 1, 7), &cal)); // Sunday
    }

    #[test]
    fn test_exceptions_override_pattern() {
        let cal = calendar()
            .with_exception(make_date(2024, 1, 2), false)
            .with_exception(make_date(2024, 1, 6), true);
        assert!(!is_working_day(make_date(2024, 1, 2), &cal));
        assert!(is_working_day(make_date(2024, 1, 6), &cal));
        assert_eq!(
            add_work_days(make_date(2024, 1, 1), 1, &cal),
            make_date(2024, 1, 3)
        );
        assert_eq!(
            add_work_days(make_date(2024, 1, 5), 1, &cal),
            make_date(2024, 1, 6)
        );
    }

    #[rstest]
    #[case(make_date(2024, 1, 1), 2, make_date(2024, 1, 3))]
    #[case(make_date(2024, 1, 4), 4, make_date(2024, 1, 10))]
    #[case(make_date(2024, 1, 5), 1, make_date(2024, 1, 8))]
    #[case(make_date(2024, 1, 8), -1, make_date(2024, 1, 5))]
    #[case(make_date(2024, 1, 10), -4, make_date(2024, 1, 4))]
    #[case(make_date(2024, 1, 6), 0, make_date(2024, 1, 8))]
    #[case(make_date(2024, 1, 3), 0, make_date(2024, 1, 3))]
    fn test_add_work_days(#[case] start: NaiveDate, #[case] n: i64, #[case] expected: NaiveDate) {
        assert_eq!(add_work_days(start, n, &calendar()), expected);
    }

    #[test]
    fn test_work_days_between_is_inclusive() {
        let cal = calendar();
        assert_eq!(
            work_days_between(make_date(2024, 1, 1), make_date(2024, 1, 7), &cal),
            5
        );
        assert_eq!(
            work_days_between(make_date(2024, 1, 4), make_date(2024, 1, 10), &cal),
            5
        );
        assert_eq!(
            work_days_between(make_date(2024, 1, 10), make_date(2024, 1, 4), &cal),
            0
        );
    }

    #[test]
    fn test_difference_inverts_add() {
        let cal = calendar();
        let a = make_date(2024, 1, 4);
        for n in -12..=12 {
            let b = add_work_days(a, n, &cal);
            assert_eq!(work_days_difference(a, b, &cal), n, "n={n}");
        }
    }

    #[test]
    fn test_finish_and_start_for_duration() {
        let cal = calendar();
        assert_eq!(
            finish_for(make_date(2024, 1, 4), 5, &cal),
            make_date(2024, 1, 10)
        );
        assert_eq!(
            start_for(make_date(2024, 1, 10), 5, &cal),
            make_date(2024, 1, 4)
        );
        // A finish on Saturday counts from Friday.
        assert_eq!(
            start_for(make_date(2024, 1, 6), 1, &cal),
            make_date(2024, 1, 5)
        );
    }

    #[test]
    fn test_validate() {
        let mut cal = calendar();
        assert!(cal.validate().is_ok());
        cal.working_days.insert(9);
        assert_eq!(cal.validate(), Err(CalendarError::InvalidWeekday(9)));
        cal.working_days.clear();
        assert_eq!(cal.validate(), Err(CalendarError::NoWorkingDays));
    }

    #[test]
    fn test_serde_shape() {
        let cal = calendar().with_exception(make_date(2024, 1, 2), false);
        let json = serde_json::to_value(&cal).unwrap();
        assert_eq!(json["working_days"], serde_json::json!([1, 2, 3, 4, 5]));
        assert_eq!(json["exceptions"]["2024-01-02"], serde_json::json!(false));
    }
}
