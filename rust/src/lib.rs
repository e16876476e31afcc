//! Gantt scheduling engine.
//!
//! A calendar-aware critical path solver behind an optimistic project store:
//! edits apply locally at once, a compute worker recomputes the schedule on
//! its own thread, and the store either adopts the result or rolls the edit
//! back. Every confirmed edit is recorded as a replayable event pair for
//! undo/redo and handed to a persistence sink.
//!
//! Wiring is explicit:
//!
//! ```no_run
//! use gantt_engine::{
//!     Calendar, ComputeChannel, MemoryEventSink, ProjectStore, ScheduleEngine, Settings, Task,
//! };
//!
//! # async fn run() -> Result<(), gantt_engine::StoreError> {
//! let settings = Settings::default();
//! let calendar = Calendar::weekdays(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
//! let channel = ComputeChannel::spawn(ScheduleEngine::new(settings.engine.clone()), &settings.channel);
//! let mut store = ProjectStore::new(channel, calendar.clone(), MemoryEventSink::new(), settings.store);
//! store.load(vec![Task::new("a", "Design", 3)], calendar).await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod logging;

pub mod calendar;
pub mod channel;
pub mod config;
pub mod critical_path;
pub mod interner;
pub mod history;
pub mod models;
pub mod order_key;
pub mod scheduler;
pub mod store;
pub mod tree;

pub use calendar::{Calendar, CalendarError};
pub use channel::{ChannelError, ComputeChannel};
pub use config::{ChannelConfig, EngineConfig, Settings, StoreConfig};
pub use critical_path::{calculate_critical_path, CriticalPathError, CriticalPathResult};
pub use history::{EventPayload, HistoryLedger, QueuedEvent};
pub use models::{
    Baseline, Constraint, ConstraintKind, Dependency, FieldChange, Health, HealthStatus, LinkType,
    RowType, SchedulingMode, Task, TaskId, TaskPatch,
};
pub use order_key::{OrderKey, OrderKeyError};
pub use scheduler::{EngineError, ScheduleCompute, ScheduleEngine, ScheduleOutcome, ScheduleStats};
pub use store::{
    EventSink, MemoryEventSink, Notice, NoticeLevel, Position, ProjectFile, ProjectSnapshot,
    ProjectStore, StoreError, ValidationError, VisibleTask,
};
