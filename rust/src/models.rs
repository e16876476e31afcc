//! Core data types for the scheduling system.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::order_key::OrderKey;

/// Stable, unique task identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-sortable id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of row in the task grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowType {
    #[default]
    Task,
    /// Blank, non-schedulable placeholder row.
    Spacer,
    /// UI-only insertion affordance.
    Phantom,
}

/// Precedence link between two tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// Finish-to-start.
    #[default]
    FS,
    /// Start-to-start.
    SS,
    /// Finish-to-finish.
    FF,
    /// Start-to-finish.
    SF,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown link type {0:?}")]
pub struct UnknownLinkType(pub String);

impl FromStr for LinkType {
    type Err = UnknownLinkType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FS" => Ok(Self::FS),
            "SS" => Ok(Self::SS),
            "FF" => Ok(Self::FF),
            "SF" => Ok(Self::SF),
            _ => Err(UnknownLinkType(s.to_string())),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FS => "FS",
            Self::SS => "SS",
            Self::FF => "FF",
            Self::SF => "SF",
        };
        f.write_str(s)
    }
}

/// A dependency on a predecessor task with a lag in work days.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub predecessor: TaskId,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    #[serde(default)]
    pub lag: i64,
}

impl Dependency {
    pub fn new(predecessor: impl Into<TaskId>, link_type: LinkType, lag: i64) -> Self {
        Self {
            predecessor: predecessor.into(),
            link_type,
            lag,
        }
    }

    /// Finish-to-start with no lag.
    pub fn fs(predecessor: impl Into<TaskId>) -> Self {
        Self::new(predecessor, LinkType::FS, 0)
    }
}

/// User-imposed scheduling constraint kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    /// As soon as possible (no constraint).
    #[default]
    Asap,
    StartNoEarlierThan,
    StartNoLaterThan,
    FinishNoEarlierThan,
    FinishNoLaterThan,
    MustFinishOn,
}

impl ConstraintKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Asap => "as soon as possible",
            Self::StartNoEarlierThan => "start no earlier than",
            Self::StartNoLaterThan => "start no later than",
            Self::FinishNoEarlierThan => "finish no earlier than",
            Self::FinishNoLaterThan => "finish no later than",
            Self::MustFinishOn => "must finish on",
        }
    }
}

/// Constraint type plus its date. ASAP carries no date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub date: Option<NaiveDate>,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, date: NaiveDate) -> Self {
        Self {
            kind,
            date: Some(date),
        }
    }

    pub fn asap() -> Self {
        Self::default()
    }

    /// The constraint's date, or None for ASAP (or a dateless constraint).
    pub fn effective_date(&self) -> Option<NaiveDate> {
        match self.kind {
            ConstraintKind::Asap => None,
            _ => self.date,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    #[default]
    Automatic,
    /// Pinned to `manual_start`; dependencies do not move it.
    Manual,
}

/// Reference snapshot of a planned schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Baseline {
    pub start: NaiveDate,
    pub finish: NaiveDate,
    pub duration: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    #[default]
    OnTrack,
    AtRisk,
    Critical,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
    pub reason: String,
}

impl Health {
    pub fn new(status: HealthStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// Fields computed by the schedule engine. Overwritten wholesale on every run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleFields {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub late_start: Option<NaiveDate>,
    pub late_finish: Option<NaiveDate>,
    pub total_float: i64,
    pub free_float: i64,
    pub is_critical: bool,
    pub health: Health,
    /// First incoming edge (in stored order) that produced the early start.
    pub driving_predecessor: Option<TaskId>,
}

/// A task (or placeholder row) in the project forest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    pub sort_key: OrderKey,
    #[serde(default)]
    pub row_type: RowType,
    pub name: String,
    /// Work days; >= 1 for real tasks, 0 for spacers.
    pub duration: u32,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub constraint: Constraint,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub mode: SchedulingMode,
    #[serde(default)]
    pub manual_start: Option<NaiveDate>,
    #[serde(default)]
    pub actual_start: Option<NaiveDate>,
    #[serde(default)]
    pub actual_finish: Option<NaiveDate>,
    #[serde(default)]
    pub baseline: Option<Baseline>,
    #[serde(flatten)]
    pub schedule: ScheduleFields,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, duration: u32) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            sort_key: OrderKey::default(),
            row_type: RowType::Task,
            name: name.into(),
            duration,
            dependencies: Vec::new(),
            constraint: Constraint::asap(),
            progress: 0,
            mode: SchedulingMode::Automatic,
            manual_start: None,
            actual_start: None,
            actual_finish: None,
            baseline: None,
            schedule: ScheduleFields::default(),
        }
    }

    /// A blank, non-schedulable spacer row.
    pub fn spacer(id: impl Into<TaskId>) -> Self {
        Self {
            row_type: RowType::Spacer,
            duration: 0,
            ..Self::new(id, "", 0)
        }
    }

    pub fn with_parent(mut self, parent: impl Into<TaskId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_sort_key(mut self, key: OrderKey) -> Self {
        self.sort_key = key;
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_manual_start(mut self, start: NaiveDate) -> Self {
        self.mode = SchedulingMode::Manual;
        self.manual_start = Some(start);
        self
    }

    pub fn with_baseline(mut self, baseline: Baseline) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Whether this row takes part in scheduling.
    pub fn is_schedulable(&self) -> bool {
        self.row_type == RowType::Task
    }
}

/// One user-writable field with its value.
///
/// This is the `field`/`new_value` payload of a TASK_UPDATED event. Parent and
/// sort key are not here: they change through TASK_MOVED.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "new_value", rename_all = "snake_case")]
pub enum FieldChange {
    Name(String),
    Duration(u32),
    Dependencies(Vec<Dependency>),
    Constraint(Constraint),
    Progress(u8),
    Mode(SchedulingMode),
    ManualStart(Option<NaiveDate>),
    ActualStart(Option<NaiveDate>),
    ActualFinish(Option<NaiveDate>),
    Baseline(Option<Baseline>),
}

impl FieldChange {
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Duration(_) => "duration",
            Self::Dependencies(_) => "dependencies",
            Self::Constraint(_) => "constraint",
            Self::Progress(_) => "progress",
            Self::Mode(_) => "mode",
            Self::ManualStart(_) => "manual_start",
            Self::ActualStart(_) => "actual_start",
            Self::ActualFinish(_) => "actual_finish",
            Self::Baseline(_) => "baseline",
        }
    }

    /// The patch that sets this one field.
    pub fn to_patch(&self) -> TaskPatch {
        let mut patch = TaskPatch::default();
        match self.clone() {
            Self::Name(v) => patch.name = Some(v),
            Self::Duration(v) => patch.duration = Some(v),
            Self::Dependencies(v) => patch.dependencies = Some(v),
            Self::Constraint(v) => patch.constraint = Some(v),
            Self::Progress(v) => patch.progress = Some(v),
            Self::Mode(v) => patch.mode = Some(v),
            Self::ManualStart(v) => patch.manual_start = Some(v),
            Self::ActualStart(v) => patch.actual_start = Some(v),
            Self::ActualFinish(v) => patch.actual_finish = Some(v),
            Self::Baseline(v) => patch.baseline = Some(v),
        }
        patch
    }
}

/// Partial update of a task's user-writable fields.
///
/// Computed schedule fields are deliberately absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub duration: Option<u32>,
    pub dependencies: Option<Vec<Dependency>>,
    pub constraint: Option<Constraint>,
    pub progress: Option<u8>,
    pub mode: Option<SchedulingMode>,
    pub manual_start: Option<Option<NaiveDate>>,
    pub actual_start: Option<Option<NaiveDate>>,
    pub actual_finish: Option<Option<NaiveDate>>,
    pub baseline: Option<Option<Baseline>>,
    pub parent_id: Option<Option<TaskId>>,
    pub sort_key: Option<OrderKey>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(v) = &self.name {
            task.name = v.clone();
        }
        if let Some(v) = self.duration {
            task.duration = v;
        }
        if let Some(v) = &self.dependencies {
            task.dependencies = v.clone();
        }
        if let Some(v) = self.constraint {
            task.constraint = v;
        }
        if let Some(v) = self.progress {
            task.progress = v;
        }
        if let Some(v) = self.mode {
            task.mode = v;
        }
        if let Some(v) = self.manual_start {
            task.manual_start = v;
        }
        if let Some(v) = self.actual_start {
            task.actual_start = v;
        }
        if let Some(v) = self.actual_finish {
            task.actual_finish = v;
        }
        if let Some(v) = self.baseline {
            task.baseline = v;
        }
        if let Some(v) = &self.parent_id {
            task.parent_id = v.clone();
        }
        if let Some(v) = &self.sort_key {
            task.sort_key = v.clone();
        }
    }

    /// Field-level changes this patch would make to `task`, as
    /// `(new, old)` pairs. Fields set to their current value are skipped.
    pub fn field_changes(&self, task: &Task) -> Vec<(FieldChange, FieldChange)> {
        let mut changes = Vec::new();
        macro_rules! diff {
            ($field:ident, $variant:ident) => {
                if let Some(v) = &self.$field {
                    if *v != task.$field {
                        changes.push((
                            FieldChange::$variant(v.clone()),
                            FieldChange::$variant(task.$field.clone()),
                        ));
                    }
                }
            };
        }
        diff!(name, Name);
        diff!(duration, Duration);
        diff!(dependencies, Dependencies);
        diff!(constraint, Constraint);
        diff!(progress, Progress);
        diff!(mode, Mode);
        diff!(manual_start, ManualStart);
        diff!(actual_start, ActualStart);
        diff!(actual_finish, ActualFinish);
        diff!(baseline, Baseline);
        changes
    }

    /// Merge the fields set in `other` into this patch.
    pub fn merge(&mut self, other: TaskPatch) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            name,
            duration,
            dependencies,
            constraint,
            progress,
            mode,
            manual_start,
            actual_start,
            actual_finish,
            baseline,
            parent_id,
            sort_key
        );
    }
}
