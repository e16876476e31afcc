//! Health classification of scheduled tasks.

use crate::calendar::{work_days_difference, Calendar};
use crate::critical_path::ConstraintViolation;
use crate::models::{Health, HealthStatus, Task};

/// Classify one task from its computed schedule.
///
/// Critical: float at or below zero, or a violated constraint. At risk: float
/// within `at_risk_float_days`, or a finish later than the baseline finish.
/// Everything else is on track. Rows without dates (spacers) keep the default.
pub fn classify(
    task: &Task,
    violation: Option<&ConstraintViolation>,
    at_risk_float_days: i64,
    calendar: &Calendar,
) -> Health {
    if !task.is_schedulable() || task.schedule.start.is_none() {
        return Health::default();
    }
    if task.progress >= 100 {
        return Health::new(HealthStatus::OnTrack, "Complete");
    }
    if let Some(violation) = violation {
        return Health::new(HealthStatus::Critical, capitalize(&violation.to_string()));
    }

    let float = task.schedule.total_float;
    if float < 0 {
        return Health::new(
            HealthStatus::Critical,
            format!("Late by {} work day{}", -float, plural(-float)),
        );
    }
    if float == 0 {
        return Health::new(HealthStatus::Critical, "On the critical path");
    }

    if let (Some(baseline), Some(end)) = (task.baseline, task.schedule.end) {
        if end > baseline.finish {
            let slip = work_days_difference(baseline.finish, end, calendar);
            return Health::new(
                HealthStatus::AtRisk,
                format!(
                    "Finishes {} work day{} after baseline",
                    slip,
                    plural(slip)
                ),
            );
        }
    }

    if float <= at_risk_float_days {
        return Health::new(
            HealthStatus::AtRisk,
            format!("Only {} work day{} of float", float, plural(float)),
        );
    }

    Health::new(
        HealthStatus::OnTrack,
        format!("{} work days of float", float),
    )
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Baseline, ConstraintKind};
    use chrono::NaiveDate;
    use rstest::rstest;

    fn make_date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scheduled(float: i64) -> Task {
        let mut task = Task::new("a", "A", 2);
        task.schedule.start = Some(make_date(2024, 1, 1));
        task.schedule.end = Some(make_date(2024, 1, 2));
        task.schedule.total_float = float;
        task
    }

    #[rstest]
    #[case(-2, HealthStatus::Critical, "Late by 2 work days")]
    #[case(0, HealthStatus::Critical, "On the critical path")]
    #[case(1, HealthStatus::AtRisk, "Only 1 work day of float")]
    #[case(2, HealthStatus::AtRisk, "Only 2 work days of float")]
    #[case(3, HealthStatus::OnTrack, "3 work days of float")]
    fn test_float_thresholds(
        #[case] float: i64,
        #[case] status: HealthStatus,
        #[case] reason: &str,
    ) {
        let cal = Calendar::weekdays(make_date(2024, 1, 1));
        let health = classify(&scheduled(float), None, 2, &cal);
        assert_eq!(health, Health::new(status, reason));
    }

    #[test]
    fn test_violation_is_critical_despite_float() {
        let cal = Calendar::weekdays(make_date(2024, 1, 1));
        let violation = ConstraintViolation {
            kind: ConstraintKind::StartNoLaterThan,
            date: make_date(2024, 1, 1),
            scheduled: make_date(2024, 1, 3),
        };
        let health = classify(&scheduled(10), Some(&violation), 2, &cal);
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(health.reason.starts_with("Start no later than"));
    }

    #[test]
    fn test_baseline_slip_is_at_risk() {
        let cal = Calendar::weekdays(make_date(2024, 1, 1));
        let task = scheduled(10).with_baseline(Baseline {
            start: make_date(2023, 12, 28),
            finish: make_date(2023, 12, 29),
            duration: 2,
        });
        let health = classify(&task, None, 2, &cal);
        assert_eq!(health.status, HealthStatus::AtRisk);
        assert_eq!(health.reason, "Finishes 2 work days after baseline");
    }

    #[test]
    fn test_spacer_has_default_health() {
        let cal = Calendar::weekdays(make_date(2024, 1, 1));
        assert_eq!(classify(&Task::spacer("s"), None, 2, &cal), Health::default());
    }
}
