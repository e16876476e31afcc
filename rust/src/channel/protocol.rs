//! Message types exchanged with the compute worker.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::models::{Task, TaskId, TaskPatch};
use crate::scheduler::ScheduleStats;

/// Correlates a response with the command that caused it. Strictly
/// increasing per channel; 0 is reserved for the worker's `Ready` message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const READY: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Initialize {
        tasks: Vec<Task>,
        calendar: Calendar,
    },
    AddTask {
        task: Box<Task>,
    },
    UpdateTask {
        id: TaskId,
        patch: TaskPatch,
    },
    /// Removes the task and all its descendants.
    DeleteTask {
        id: TaskId,
    },
    /// Replaces the worker's task list wholesale.
    SyncTasks {
        tasks: Vec<Task>,
    },
    UpdateCalendar {
        calendar: Calendar,
    },
    Calculate,
    Dispose,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "INITIALIZE",
            Self::AddTask { .. } => "ADD_TASK",
            Self::UpdateTask { .. } => "UPDATE_TASK",
            Self::DeleteTask { .. } => "DELETE_TASK",
            Self::SyncTasks { .. } => "SYNC_TASKS",
            Self::UpdateCalendar { .. } => "UPDATE_CALENDAR",
            Self::Calculate => "CALCULATE",
            Self::Dispose => "DISPOSE",
        }
    }

    /// Whether the worker answers this command at all.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Self::Dispose)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Ready,
    Initialized {
        success: bool,
    },
    CalculationResult {
        tasks: Vec<Task>,
        stats: ScheduleStats,
    },
    TasksSynced,
    Error {
        message: String,
    },
}

impl Response {
    /// Whether this response completes its request. `Ready`, `Initialized`
    /// and `TasksSynced` are followed by a result or an error.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::CalculationResult { .. } | Self::Error { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: RequestId,
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: RequestId, response: Response) -> Self {
        Self { id, response }
    }
}
