//! The project store: optimistic local state kept in step with the engine.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::calendar::Calendar;
use crate::channel::{ChannelError, Command, ComputeChannel, RequestId, Response, ResponseEnvelope};
use crate::config::StoreConfig;
use crate::history::{ActionId, EventPayload, HistoryLedger, QueuedEvent, Replay};
use crate::models::{FieldChange, Task, TaskId, TaskPatch};
use crate::scheduler::ScheduleStats;
use crate::tree::{self, Position, VisibleRow};

use super::error::{Notice, StoreError};
use super::pending::{Origin, PendingOperation, PendingQueue, Snapshot};
use super::sink::EventSink;
use super::validation::{self, ValidationError};

const NOTICE_CAPACITY: usize = 64;

/// What observers see. Cheap to clone: tasks are shared.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectSnapshot {
    pub tasks: Arc<Vec<Arc<Task>>>,
    pub calendar: Arc<Calendar>,
    /// True while a change has not yet been confirmed by the engine.
    pub pending: bool,
    pub stats: Option<ScheduleStats>,
}

pub type VisibleTask = VisibleRow<Arc<Task>>;

/// Import/export shape of a whole project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub tasks: Vec<Task>,
    pub calendar: Calendar,
}

impl ProjectFile {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Holds tasks and calendar, applies edits optimistically, and reconciles
/// with the compute worker.
///
/// Mutations return as soon as the command is dispatched. Call `settle` (or
/// `poll`) to process the engine's answers: confirmed changes are persisted
/// through the sink, rejected ones are rolled back.
pub struct ProjectStore {
    tasks: Arc<Vec<Arc<Task>>>,
    calendar: Arc<Calendar>,
    stats: Option<ScheduleStats>,
    channel: ComputeChannel,
    ledger: HistoryLedger,
    pending: PendingQueue,
    sink: Box<dyn EventSink>,
    config: StoreConfig,
    updates: watch::Sender<ProjectSnapshot>,
    notices: broadcast::Sender<Notice>,
    last_error: Option<StoreError>,
}

impl ProjectStore {
    pub fn new(
        channel: ComputeChannel,
        calendar: Calendar,
        sink: impl EventSink + 'static,
        config: StoreConfig,
    ) -> Self {
        let tasks = Arc::new(Vec::new());
        let calendar = Arc::new(calendar);
        let (updates, _) = watch::channel(ProjectSnapshot {
            tasks: Arc::clone(&tasks),
            calendar: Arc::clone(&calendar),
            pending: false,
            stats: None,
        });
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            tasks,
            calendar,
            stats: None,
            channel,
            ledger: HistoryLedger::new(config.history_limit),
            pending: PendingQueue::default(),
            sink: Box::new(sink),
            config,
            updates,
            notices,
            last_error: None,
        }
    }

    // ---- read views ----

    pub fn tasks(&self) -> Arc<Vec<Arc<Task>>> {
        Arc::clone(&self.tasks)
    }

    pub fn calendar(&self) -> Arc<Calendar> {
        Arc::clone(&self.calendar)
    }

    pub fn task(&self, id: &TaskId) -> Option<Arc<Task>> {
        self.tasks.iter().find(|t| &t.id == id).cloned()
    }

    pub fn stats(&self) -> Option<&ScheduleStats> {
        self.stats.as_ref()
    }

    /// Rows to render, hiding the descendants of collapsed rows.
    pub fn visible_tasks(&self, is_collapsed: impl Fn(&TaskId) -> bool) -> Vec<VisibleTask> {
        tree::visible(self.tasks.as_slice(), is_collapsed)
    }

    pub fn is_parent(&self, id: &TaskId) -> bool {
        tree::is_parent(self.tasks.as_slice(), id)
    }

    pub fn depth(&self, id: &TaskId) -> Option<usize> {
        tree::depth(self.tasks.as_slice(), id)
    }

    pub fn subscribe(&self) -> watch::Receiver<ProjectSnapshot> {
        self.updates.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn can_undo(&self) -> bool {
        self.ledger.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.ledger.can_redo()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.ledger.undo_label()
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.ledger.redo_label()
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The current project in its file shape.
    pub fn export(&self) -> ProjectFile {
        ProjectFile {
            tasks: self.tasks.iter().map(|t| Task::clone(t)).collect(),
            calendar: Calendar::clone(&self.calendar),
        }
    }

    // ---- whole-project operations ----

    /// Replace the project and initialize the engine with it. History is
    /// reset. Waits for the first computation.
    pub async fn load(&mut self, tasks: Vec<Task>, calendar: Calendar) -> Result<(), StoreError> {
        let tasks: Vec<Arc<Task>> = tasks.into_iter().map(Arc::new).collect();
        if let Err(err) = validation::validate_calendar(&calendar)
            .and_then(|_| validation::validate_project(&tasks))
        {
            return Err(self.reject(err.into()));
        }
        if let Err(err) = self.settle().await {
            debug!(error = %err, "outstanding work failed before load");
        }

        let snapshot = self.snapshot();
        let ledger = std::mem::replace(&mut self.ledger, HistoryLedger::new(self.config.history_limit));
        let plain: Vec<Task> = tasks.iter().map(|t| Task::clone(t)).collect();
        self.set_tasks(tasks);
        self.calendar = Arc::new(calendar.clone());
        self.publish();

        match self.channel.initialize(plain, calendar).await {
            Ok(id) => {
                info!(request = %id, tasks = self.tasks.len(), "project loaded");
                let mut op = PendingOperation::new("INITIALIZE", snapshot, Origin::Load);
                op.requests.push(id);
                op.touches_calendar = true;
                self.pending.push(op);
                self.publish();
                self.settle().await
            }
            Err(err) => {
                warn!(error = %err, "engine initialization failed");
                self.ledger = ledger;
                self.restore(snapshot);
                Err(self.reject(err.into()))
            }
        }
    }

    /// Replace the task list without recording history or emitting events.
    pub fn import(&mut self, tasks: Vec<Task>) -> Result<(), StoreError> {
        let tasks: Vec<Arc<Task>> = tasks.into_iter().map(Arc::new).collect();
        if let Err(err) = validation::validate_project(&tasks) {
            return Err(self.reject(err.into()));
        }
        let snapshot = self.snapshot();
        let plain: Vec<Task> = tasks.iter().map(|t| Task::clone(t)).collect();
        self.set_tasks(tasks);
        let op = PendingOperation::new("SYNC_TASKS", snapshot, Origin::Import);
        self.dispatch(op, vec![Command::SyncTasks { tasks: plain }])
    }

    /// Ask the engine for a fresh computation of the current state.
    pub fn recalculate(&mut self) -> Result<(), StoreError> {
        let op = PendingOperation::new("CALCULATE", self.snapshot(), Origin::Recalculate);
        self.dispatch(op, vec![Command::Calculate])
    }

    // ---- mutations ----

    /// Add `task` among its parent's children at `position`. An empty id is
    /// replaced with a generated one.
    pub fn add_task(&mut self, mut task: Task, position: Position) -> Result<TaskId, StoreError> {
        if task.id.as_str().is_empty() {
            task.id = TaskId::generate();
        }
        if self.index_of(&task.id).is_some() {
            return Err(self.reject(ValidationError::DuplicateTask(task.id).into()));
        }
        task.sort_key =
            match tree::key_for_position(self.tasks.as_slice(), task.parent_id.as_ref(), &position, None) {
                Ok(key) => key,
                Err(err) => return Err(self.reject(err.into())),
            };
        if let Err(err) = validation::validate_candidate(&task, &self.tasks) {
            return Err(self.reject(err.into()));
        }

        let id = task.id.clone();
        let snapshot = self.snapshot();
        let mut next = self.tasks.as_ref().clone();
        next.push(Arc::new(task.clone()));
        self.set_tasks(next);

        let forward = vec![QueuedEvent::created(&task)];
        let backward = vec![QueuedEvent::deleted(&id)];
        let action = self.ledger.record("Add task", forward.clone(), backward);
        let op = PendingOperation::new("ADD_TASK", snapshot, Origin::User(Some(action)))
            .with_target(&id)
            .with_outbox(forward);
        self.dispatch(op, vec![Command::AddTask { task: Box::new(task) }])?;
        Ok(id)
    }

    /// Apply the fields set in `patch`. Fields already at the requested value
    /// are skipped; an edit that changes nothing is not dispatched.
    pub fn update_task(&mut self, id: &TaskId, patch: TaskPatch) -> Result<(), StoreError> {
        let Some(index) = self.index_of(id) else {
            return Err(self.reject(ValidationError::UnknownTask(id.clone()).into()));
        };
        let current = Arc::clone(&self.tasks[index]);
        let changes = patch.field_changes(&current);

        let new_parent = patch.parent_id.clone().unwrap_or_else(|| current.parent_id.clone());
        let reparented = new_parent != current.parent_id;
        let new_key = match (&patch.sort_key, reparented) {
            (Some(key), _) => key.clone(),
            (None, true) => match tree::key_for_position(
                self.tasks.as_slice(),
                new_parent.as_ref(),
                &Position::Last,
                Some(id),
            ) {
                Ok(key) => key,
                Err(err) => return Err(self.reject(err.into())),
            },
            (None, false) => current.sort_key.clone(),
        };
        let moved = reparented || new_key != current.sort_key;
        if changes.is_empty() && !moved {
            debug!(task = %id, "update changes nothing");
            return Ok(());
        }

        let mut effective = TaskPatch::default();
        for (new, _) in &changes {
            effective.merge(new.to_patch());
        }
        if moved {
            effective.parent_id = Some(new_parent.clone());
            effective.sort_key = Some(new_key.clone());
        }
        let mut updated = Task::clone(&current);
        effective.apply(&mut updated);
        if let Err(err) = validation::validate_candidate(&updated, &self.tasks) {
            return Err(self.reject(err.into()));
        }

        let mut pairs: Vec<(QueuedEvent, QueuedEvent)> = changes
            .into_iter()
            .map(|(new, old)| (QueuedEvent::updated(id, new), QueuedEvent::updated(id, old)))
            .collect();
        if moved {
            pairs.push((
                QueuedEvent::moved(
                    id,
                    current.parent_id.clone(),
                    new_parent.clone(),
                    current.sort_key.clone(),
                    new_key.clone(),
                ),
                QueuedEvent::moved(id, new_parent, current.parent_id.clone(), new_key, current.sort_key.clone()),
            ));
        }

        let snapshot = self.snapshot();
        let mut next = self.tasks.as_ref().clone();
        next[index] = Arc::new(updated);
        self.set_tasks(next);

        let outbox: Vec<QueuedEvent> = pairs.iter().map(|(f, _)| f.clone()).collect();
        let action = self.record_pairs(pairs);
        let op = PendingOperation::new("UPDATE_TASK", snapshot, Origin::User(Some(action)))
            .with_target(id)
            .with_outbox(outbox);
        self.dispatch(
            op,
            vec![Command::UpdateTask {
                id: id.clone(),
                patch: effective,
            }],
        )
    }

    /// Reparent and/or reorder a task.
    pub fn move_task(
        &mut self,
        id: &TaskId,
        new_parent: Option<TaskId>,
        position: Position,
    ) -> Result<(), StoreError> {
        if self.index_of(id).is_none() {
            return Err(self.reject(ValidationError::UnknownTask(id.clone()).into()));
        }
        let key = match tree::key_for_position(self.tasks.as_slice(), new_parent.as_ref(), &position, Some(id)) {
            Ok(key) => key,
            Err(err) => return Err(self.reject(err.into())),
        };
        self.update_task(
            id,
            TaskPatch {
                parent_id: Some(new_parent),
                sort_key: Some(key),
                ..Default::default()
            },
        )
    }

    /// Delete a task with all its descendants. Dependencies on any removed
    /// task are stripped from the survivors.
    pub fn delete_task(&mut self, id: &TaskId) -> Result<(), StoreError> {
        let removed_ids = tree::cascade_ids(self.tasks.as_slice(), id);
        if removed_ids.is_empty() {
            return Err(self.reject(ValidationError::UnknownTask(id.clone()).into()));
        }
        let removed: FxHashSet<TaskId> = removed_ids.iter().cloned().collect();
        let stripped = tree::stripped_dependencies(self.tasks.as_slice(), &removed);
        let by_id: FxHashMap<&TaskId, &Arc<Task>> = self.tasks.iter().map(|t| (&t.id, t)).collect();

        let mut forward = Vec::new();
        let mut backward = Vec::new();
        for (dependent, kept) in &stripped {
            let old = by_id
                .get(dependent)
                .map(|t| t.dependencies.clone())
                .unwrap_or_default();
            forward.push(QueuedEvent::updated(dependent, FieldChange::Dependencies(kept.clone())));
            backward.push(QueuedEvent::updated(dependent, FieldChange::Dependencies(old)));
        }
        for removed_id in removed_ids.iter().rev() {
            if let Some(task) = by_id.get(removed_id) {
                forward.push(QueuedEvent::deleted(removed_id));
                backward.push(QueuedEvent::created(task));
            }
        }

        let stripped: FxHashMap<TaskId, _> = stripped.into_iter().collect();
        let next: Vec<Arc<Task>> = self
            .tasks
            .iter()
            .filter(|t| !removed.contains(&t.id))
            .map(|t| match stripped.get(&t.id) {
                Some(kept) => {
                    let mut task = Task::clone(t);
                    task.dependencies = kept.clone();
                    Arc::new(task)
                }
                None => Arc::clone(t),
            })
            .collect();

        let snapshot = self.snapshot();
        self.set_tasks(next);
        let label = if removed_ids.len() > 1 {
            format!("Delete {} tasks", removed_ids.len())
        } else {
            "Delete task".to_string()
        };
        let action = self.ledger.record(&label, forward.clone(), backward);
        let op = PendingOperation::new("DELETE_TASK", snapshot, Origin::User(Some(action)))
            .with_target(id)
            .with_outbox(forward);
        self.dispatch(op, vec![Command::DeleteTask { id: id.clone() }])
    }

    pub fn update_calendar(&mut self, calendar: Calendar) -> Result<(), StoreError> {
        if let Err(err) = validation::validate_calendar(&calendar) {
            return Err(self.reject(err.into()));
        }
        if *self.calendar == calendar {
            return Ok(());
        }
        let snapshot = self.snapshot();
        let forward = vec![QueuedEvent::calendar(&calendar)];
        let backward = vec![QueuedEvent::calendar(&self.calendar)];
        self.calendar = Arc::new(calendar.clone());
        self.publish();

        let action = self.ledger.record("Change calendar", forward.clone(), backward);
        let mut op = PendingOperation::new("UPDATE_CALENDAR", snapshot, Origin::User(Some(action)))
            .with_outbox(forward);
        op.touches_calendar = true;
        self.dispatch(op, vec![Command::UpdateCalendar { calendar }])
    }

    // ---- history ----

    /// Revert the latest action. Returns false if there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, StoreError> {
        let Some(replay) = self.ledger.undo() else {
            return Ok(false);
        };
        let origin = Origin::Undo(replay.action_id);
        self.replay(replay, origin, "Undid")
    }

    /// Re-apply the latest undone action. Returns false if there is nothing
    /// to redo.
    pub fn redo(&mut self) -> Result<bool, StoreError> {
        let Some(replay) = self.ledger.redo() else {
            return Ok(false);
        };
        let origin = Origin::Redo(replay.action_id);
        self.replay(replay, origin, "Redid")
    }

    /// Apply replayed events to local state and push the result to the engine.
    /// Nothing is recorded and nothing reaches the sink.
    fn replay(&mut self, replay: Replay, origin: Origin, verb: &str) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.as_ref().clone();
        let mut calendar = None;
        for event in &replay.events {
            if let Err(err) = apply_event(&mut tasks, &mut calendar, event) {
                warn!(action = replay.action_id, error = %err, "history replay failed");
                self.release(origin);
                return Err(self.reject(err.into()));
            }
        }
        let tasks_changed = replay.events.iter().any(|e| e.target_id.is_some());

        let snapshot = self.snapshot();
        let kind = match origin {
            Origin::Undo(_) => "UNDO",
            _ => "REDO",
        };
        let mut op = PendingOperation::new(kind, snapshot, origin);
        let mut commands = Vec::new();
        if let Some(calendar) = calendar {
            self.calendar = Arc::new(calendar.clone());
            op.touches_calendar = true;
            commands.push(Command::UpdateCalendar { calendar });
        }
        if tasks_changed {
            let plain = tasks.iter().map(|t| Task::clone(t)).collect();
            self.set_tasks(tasks);
            commands.push(Command::SyncTasks { tasks: plain });
        }
        self.dispatch(op, commands)?;
        self.notify(Notice::success(format!("{verb} \"{}\"", replay.label)));
        Ok(true)
    }

    // ---- engine responses ----

    /// Wait until every dispatched change has been confirmed or rolled back.
    /// Returns the last compute error seen since the previous call.
    pub async fn settle(&mut self) -> Result<(), StoreError> {
        while !self.pending.is_empty() {
            match self.channel.recv().await {
                Some(envelope) => self.handle_response(envelope),
                None => {
                    self.abandon_all();
                    return Err(self.reject(ChannelError::Unavailable.into()));
                }
            }
        }
        match self.last_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Handle every response already available. Returns how many there were.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.channel.try_recv() {
            self.handle_response(envelope);
            handled += 1;
        }
        handled
    }

    fn handle_response(&mut self, envelope: ResponseEnvelope) {
        let ResponseEnvelope { id, response } = envelope;
        match response {
            Response::Ready | Response::Initialized { .. } | Response::TasksSynced => {}
            Response::CalculationResult { tasks, stats } => {
                let Some(index) = self.pending.position(id) else {
                    debug!(request = %id, "ignoring result for a settled request");
                    return;
                };
                if let Some(op) = self.pending.complete(index, id) {
                    debug!(request = %id, kind = op.kind, target = ?op.target, "change confirmed");
                    if !op.outbox.is_empty() {
                        self.sink.persist(&op.outbox);
                    }
                }
                if self.channel.is_stale(id) {
                    debug!(request = %id, "discarding stale result");
                } else {
                    self.adopt(tasks);
                    self.stats = Some(stats);
                }
                self.publish();
            }
            Response::Error { message } => {
                let Some(index) = self.pending.position(id) else {
                    debug!(request = %id, %message, "ignoring error for a settled request");
                    return;
                };
                self.roll_back(index, id, message);
            }
        }
    }

    /// Undo the operation at `index` and everything dispatched after it,
    /// then bring the engine back in line with the restored state.
    fn roll_back(&mut self, index: usize, id: RequestId, message: String) {
        let ops = self.pending.split_off(index);
        let Some(first) = ops.first() else {
            return;
        };
        warn!(request = %id, kind = first.kind, target = ?first.target, %message, "rolling back");
        let restored = first.snapshot.clone();
        let touches_calendar = ops.iter().any(|op| op.touches_calendar);
        let realign = ops.iter().any(|op| op.origin != Origin::Resync);
        for op in ops.iter().rev() {
            self.release(op.origin);
        }
        self.restore(restored.clone());

        if realign {
            self.realign(restored, touches_calendar);
        }
        let err = StoreError::Compute(message);
        self.notify(err.notice());
        self.last_error = Some(err);
        self.publish();
    }

    /// Replace the engine's copy with `state`.
    fn realign(&mut self, state: Snapshot, include_calendar: bool) {
        let mut op = PendingOperation::new("SYNC_TASKS", state.clone(), Origin::Resync);
        if include_calendar {
            op.touches_calendar = true;
            match self.channel.dispatch(Command::UpdateCalendar {
                calendar: Calendar::clone(&state.calendar),
            }) {
                Ok(id) => op.requests.push(id),
                Err(err) => warn!(error = %err, "could not realign engine calendar"),
            }
        }
        let tasks = state.tasks.iter().map(|t| Task::clone(t)).collect();
        match self.channel.dispatch(Command::SyncTasks { tasks }) {
            Ok(id) => op.requests.push(id),
            Err(err) => warn!(error = %err, "could not realign engine tasks"),
        }
        self.pending.push(op);
    }

    /// The worker is gone: roll back everything still unconfirmed.
    fn abandon_all(&mut self) {
        let ops = self.pending.drain();
        let Some(first) = ops.first() else {
            return;
        };
        let restored = first.snapshot.clone();
        for op in ops.iter().rev() {
            self.release(op.origin);
        }
        self.restore(restored);
    }

    // ---- internals ----

    /// Dispatch the commands for `op`. If the channel refuses, the operation
    /// is undone on the spot.
    fn dispatch(&mut self, mut op: PendingOperation, commands: Vec<Command>) -> Result<(), StoreError> {
        for command in commands {
            match self.channel.dispatch(command) {
                Ok(id) => op.requests.push(id),
                Err(err) => {
                    warn!(kind = op.kind, error = %err, "dispatch failed");
                    self.release(op.origin);
                    self.restore(op.snapshot);
                    return Err(self.reject(err.into()));
                }
            }
        }
        let kind = op.kind;
        self.pending.push(op);
        debug!(kind, outstanding = self.pending.len(), "change dispatched");
        self.publish();
        Ok(())
    }

    /// Record event pairs as one undoable action.
    fn record_pairs(&mut self, pairs: Vec<(QueuedEvent, QueuedEvent)>) -> ActionId {
        if pairs.len() == 1 {
            let label = match &pairs[0].0.payload {
                EventPayload::TaskUpdated(change) => format!("Edit {}", change.field_name().replace('_', " ")),
                EventPayload::TaskMoved { .. } => "Move task".to_string(),
                _ => self.config.composite_label.clone(),
            };
            let (forward, backward): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
            return self.ledger.record(&label, forward, backward);
        }
        let action = self.ledger.begin_composite(&self.config.composite_label);
        for (forward, backward) in pairs {
            self.ledger.record(&self.config.composite_label, vec![forward], vec![backward]);
        }
        self.ledger.end_composite();
        action
    }

    /// Undo a pending operation's effect on the ledger.
    fn release(&mut self, origin: Origin) {
        match origin {
            Origin::User(Some(action)) => {
                self.ledger.revoke(action);
            }
            Origin::Undo(action) => {
                self.ledger.reinstate_undo(action);
            }
            Origin::Redo(action) => {
                self.ledger.reinstate_redo(action);
            }
            Origin::User(None)
            | Origin::Load
            | Origin::Import
            | Origin::Recalculate
            | Origin::Resync => {}
        }
    }

    fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: Arc::clone(&self.tasks),
            calendar: Arc::clone(&self.calendar),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.tasks = snapshot.tasks;
        self.calendar = snapshot.calendar;
        self.publish();
    }

    fn set_tasks(&mut self, mut tasks: Vec<Arc<Task>>) {
        tree::arrange(&mut tasks);
        self.tasks = Arc::new(tasks);
        self.publish();
    }

    /// Take the engine's tasks, keeping the current allocation for any task
    /// that came back unchanged.
    fn adopt(&mut self, tasks: Vec<Task>) {
        let current: FxHashMap<&TaskId, &Arc<Task>> = self.tasks.iter().map(|t| (&t.id, t)).collect();
        let next: Vec<Arc<Task>> = tasks
            .into_iter()
            .map(|task| match current.get(&task.id) {
                Some(existing) if ***existing == task => Arc::clone(existing),
                _ => Arc::new(task),
            })
            .collect();
        self.set_tasks(next);
    }

    fn publish(&self) {
        self.updates.send_replace(ProjectSnapshot {
            tasks: Arc::clone(&self.tasks),
            calendar: Arc::clone(&self.calendar),
            pending: !self.pending.is_empty(),
            stats: self.stats.clone(),
        });
    }

    fn notify(&self, notice: Notice) {
        debug!(level = ?notice.level, message = %notice.message, "notice");
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn reject(&self, err: StoreError) -> StoreError {
        self.notify(err.notice());
        err
    }
}

/// Apply one history event to a working copy.
fn apply_event(
    tasks: &mut Vec<Arc<Task>>,
    calendar: &mut Option<Calendar>,
    event: &QueuedEvent,
) -> Result<(), ValidationError> {
    let target = event.target_id.clone().unwrap_or_else(|| TaskId::new(""));
    let index = tasks.iter().position(|t| t.id == target);
    match (&event.payload, index) {
        (EventPayload::CalendarUpdated { calendar: next }, _) => {
            *calendar = Some(next.clone());
        }
        (EventPayload::TaskCreated { task }, None) => {
            tasks.push(Arc::new(Task::clone(task)));
        }
        (EventPayload::TaskCreated { .. }, Some(_)) => {
            return Err(ValidationError::DuplicateTask(target));
        }
        (EventPayload::TaskUpdated(change), Some(i)) => {
            change.to_patch().apply(Arc::make_mut(&mut tasks[i]));
        }
        (EventPayload::TaskDeleted, Some(i)) => {
            tasks.remove(i);
        }
        (
            EventPayload::TaskMoved {
                new_parent,
                new_sort_key,
                ..
            },
            Some(i),
        ) => {
            let task = Arc::make_mut(&mut tasks[i]);
            task.parent_id = new_parent.clone();
            task.sort_key = new_sort_key.clone();
        }
        (_, None) => return Err(ValidationError::UnknownTask(target)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::config::ChannelConfig;
    use crate::critical_path::CriticalPathError;
    use crate::models::Dependency;
    use crate::scheduler::{EngineError, ScheduleCompute, ScheduleEngine, ScheduleOutcome};
    use crate::store::{MemoryEventSink, NoticeLevel};

    fn make_date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar() -> Calendar {
        Calendar::weekdays(make_date(2024, 1, 1))
    }

    /// Engine that refuses any task longer than 100 days.
    struct PickyEngine;

    impl ScheduleCompute for PickyEngine {
        fn compute(&self, tasks: &[Task], calendar: &Calendar) -> Result<ScheduleOutcome, EngineError> {
            if tasks.iter().any(|t| t.duration > 100) {
                return Err(EngineError::CriticalPath(CriticalPathError::CircularDependency {
                    path: vec!["x".into(), "x".into()],
                }));
            }
            ScheduleEngine::default().compute(tasks, calendar)
        }
    }

    struct SlowEngine;

    impl ScheduleCompute for SlowEngine {
        fn compute(&self, tasks: &[Task], calendar: &Calendar) -> Result<ScheduleOutcome, EngineError> {
            std::thread::sleep(Duration::from_millis(300));
            ScheduleEngine::default().compute(tasks, calendar)
        }
    }

    fn store_with<E: ScheduleCompute>(engine: E) -> (ProjectStore, MemoryEventSink) {
        let sink = MemoryEventSink::new();
        let channel = ComputeChannel::spawn(engine, &ChannelConfig::default());
        let store = ProjectStore::new(channel, calendar(), sink.clone(), StoreConfig::default());
        (store, sink)
    }

    fn ab() -> Vec<Task> {
        vec![
            Task::new("a", "A", 3),
            Task::new("b", "B", 5).with_dependency(Dependency::fs("a")),
        ]
    }

    fn plain(store: &ProjectStore) -> Vec<Task> {
        store.tasks().iter().map(|t| Task::clone(t)).collect()
    }

    fn get(store: &ProjectStore, id: &str) -> Arc<Task> {
        store.task(&id.into()).unwrap()
    }

    #[tokio::test]
    async fn test_load_schedules_chain() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();

        let a = get(&store, "a");
        let b = get(&store, "b");
        assert_eq!(a.schedule.start, Some(make_date(2024, 1, 1)));
        assert_eq!(a.schedule.end, Some(make_date(2024, 1, 3)));
        assert_eq!(b.schedule.start, Some(make_date(2024, 1, 4)));
        assert_eq!(b.schedule.end, Some(make_date(2024, 1, 10)));
        assert!(a.schedule.is_critical && b.schedule.is_critical);
        assert!(!store.is_pending());
        assert!(!store.can_undo());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_and_undo_redo_restores() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();
        let original = plain(&store);

        store
            .update_task(
                &"a".into(),
                TaskPatch {
                    duration: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(get(&store, "a").duration, 5);
        assert!(store.is_pending());
        store.settle().await.unwrap();
        assert_eq!(get(&store, "b").schedule.start, Some(make_date(2024, 1, 8)));
        assert_eq!(sink.len(), 1);
        let edited = plain(&store);

        assert!(store.undo().unwrap());
        store.settle().await.unwrap();
        assert_eq!(plain(&store), original);

        assert!(store.redo().unwrap());
        store.settle().await.unwrap();
        assert_eq!(plain(&store), edited);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_field_edit_is_one_action() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();
        let original = plain(&store);

        store
            .update_task(
                &"b".into(),
                TaskPatch {
                    name: Some("Build".into()),
                    duration: Some(2),
                    progress: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        store.settle().await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(store.undo_label(), Some("Edit task"));

        store.undo().unwrap();
        store.settle().await.unwrap();
        assert_eq!(plain(&store), original);
        assert!(!store.can_undo());
    }

    #[tokio::test]
    async fn test_noop_update_is_skipped() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();
        store
            .update_task(
                &"a".into(),
                TaskPatch {
                    name: Some("A".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!store.is_pending());
        assert!(!store.can_undo());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_state_changes() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();
        let before = store.tasks();
        let mut notices = store.notices();

        let err = store
            .update_task(
                &"a".into(),
                TaskPatch {
                    dependencies: Some(vec![Dependency::fs("b")]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::CyclicDependency { .. })
        ));
        assert!(Arc::ptr_eq(&before, &store.tasks()));
        assert!(!store.can_undo());
        assert!(sink.is_empty());
        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn test_engine_error_rolls_back() {
        let (mut store, sink) = store_with(PickyEngine);
        store.load(ab(), calendar()).await.unwrap();
        let before = plain(&store);
        let mut notices = store.notices();

        store
            .update_task(
                &"a".into(),
                TaskPatch {
                    duration: Some(200),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(get(&store, "a").duration, 200);

        let err = store.settle().await.unwrap_err();
        assert!(matches!(err, StoreError::Compute(_)));
        assert_eq!(plain(&store), before);
        assert!(!store.can_undo());
        assert!(sink.is_empty());
        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(!notice.message.contains("x -> x"));
    }

    #[tokio::test]
    async fn test_rollback_discards_later_changes() {
        let (mut store, sink) = store_with(PickyEngine);
        store.load(ab(), calendar()).await.unwrap();

        let rename = |name: &str| TaskPatch {
            name: Some(name.into()),
            ..Default::default()
        };
        store.update_task(&"a".into(), rename("Design")).unwrap();
        store
            .update_task(
                &"a".into(),
                TaskPatch {
                    duration: Some(500),
                    ..Default::default()
                },
            )
            .unwrap();
        store.update_task(&"b".into(), rename("Build")).unwrap();

        assert!(store.settle().await.is_err());
        assert_eq!(get(&store, "a").name, "Design");
        assert_eq!(get(&store, "a").duration, 3);
        assert_eq!(get(&store, "b").name, "B");
        assert_eq!(sink.len(), 1);
        assert_eq!(store.undo_label(), Some("Edit name"));

        // The engine was realigned: a fresh edit computes from the restored state.
        store.update_task(&"b".into(), rename("Ship")).unwrap();
        store.settle().await.unwrap();
        assert_eq!(get(&store, "a").schedule.end, Some(make_date(2024, 1, 3)));
        assert_eq!(get(&store, "b").name, "Ship");
    }

    #[tokio::test]
    async fn test_delete_cascades_and_undo_restores() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        let tasks = vec![
            Task::new("p", "Phase", 1),
            Task::new("c", "Child", 2).with_parent("p"),
            Task::new("d", "Dependent", 1)
                .with_dependency(Dependency::fs("c"))
                .with_dependency(Dependency::fs("x")),
            Task::new("x", "Other", 1),
        ];
        store.load(tasks, calendar()).await.unwrap();
        let original = plain(&store);

        store.delete_task(&"p".into()).unwrap();
        store.settle().await.unwrap();
        let ids: Vec<String> = store.tasks().iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["d", "x"]);
        assert_eq!(get(&store, "d").dependencies, vec![Dependency::fs("x")]);

        let kinds: Vec<&str> = sink.events().iter().map(|e| e.payload.kind()).collect();
        assert_eq!(kinds, vec!["TASK_UPDATED", "TASK_DELETED", "TASK_DELETED"]);

        store.undo().unwrap();
        store.settle().await.unwrap();
        assert_eq!(plain(&store), original);
    }

    #[tokio::test]
    async fn test_add_and_move_positions() {
        let (mut store, _sink) = store_with(ScheduleEngine::default());
        store.load(Vec::new(), calendar()).await.unwrap();

        let a = store.add_task(Task::new("a", "A", 1), Position::Last).unwrap();
        let b = store.add_task(Task::new("b", "B", 1), Position::Last).unwrap();
        let c = store
            .add_task(Task::new("", "C", 1), Position::Before(b.clone()))
            .unwrap();
        store.settle().await.unwrap();
        let tasks = store.tasks();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "B"]);
        assert!(!c.as_str().is_empty());

        store.move_task(&b, Some(a.clone()), Position::Last).unwrap();
        store.settle().await.unwrap();
        assert!(store.is_parent(&a));
        assert_eq!(store.depth(&b), Some(1));
        assert_eq!(store.undo_label(), Some("Move task"));

        let visible = store.visible_tasks(|id| id == &a);
        let shown: Vec<&str> = visible.iter().map(|row| row.task.name.as_str()).collect();
        assert_eq!(shown, vec!["A", "C"]);

        store.undo().unwrap();
        store.settle().await.unwrap();
        assert_eq!(store.depth(&b), Some(0));
    }

    #[tokio::test]
    async fn test_calendar_edit_moves_dates() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();

        let holiday = calendar().with_exception(make_date(2024, 1, 2), false);
        store.update_calendar(holiday.clone()).unwrap();
        store.settle().await.unwrap();
        assert_eq!(get(&store, "a").schedule.end, Some(make_date(2024, 1, 4)));
        assert_eq!(*store.calendar(), holiday);
        assert_eq!(sink.events()[0].payload.kind(), "CALENDAR_UPDATED");

        store.undo().unwrap();
        store.settle().await.unwrap();
        assert_eq!(*store.calendar(), calendar());
        assert_eq!(get(&store, "a").schedule.end, Some(make_date(2024, 1, 3)));
    }

    #[tokio::test]
    async fn test_recalculate_refreshes_stats() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();
        let before = plain(&store);
        store.recalculate().unwrap();
        assert!(store.is_pending());
        store.settle().await.unwrap();
        assert_eq!(plain(&store), before);
        assert_eq!(store.stats().map(|s| s.critical_count), Some(2));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_import_emits_nothing() {
        let (mut store, sink) = store_with(ScheduleEngine::default());
        store.load(Vec::new(), calendar()).await.unwrap();
        store.import(ab()).unwrap();
        store.settle().await.unwrap();
        assert_eq!(get(&store, "b").schedule.end, Some(make_date(2024, 1, 10)));
        assert!(sink.is_empty());
        assert!(!store.can_undo());
    }

    #[tokio::test]
    async fn test_subscribers_see_pending_then_result() {
        let (mut store, _sink) = store_with(ScheduleEngine::default());
        store.load(ab(), calendar()).await.unwrap();
        let updates = store.subscribe();

        store
            .update_task(
                &"a".into(),
                TaskPatch {
                    progress: Some(50),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updates.borrow().pending);
        store.settle().await.unwrap();
        let snapshot = updates.borrow().clone();
        assert!(!snapshot.pending);
        assert_eq!(snapshot.stats.map(|s| s.task_count), Some(2));
    }

    #[tokio::test]
    async fn test_initialization_timeout_keeps_state() {
        let sink = MemoryEventSink::new();
        let channel = ComputeChannel::spawn(SlowEngine, &ChannelConfig { init_timeout_ms: 20 });
        let mut store = ProjectStore::new(channel, calendar(), sink, StoreConfig::default());

        let err = store.load(ab(), calendar()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Channel(ChannelError::InitializationTimeout(_))
        ));
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_project_never_reaches_the_store() {
        let sink = MemoryEventSink::new();
        let channel = ComputeChannel::spawn(SlowEngine, &ChannelConfig { init_timeout_ms: 20 });
        let mut store = ProjectStore::new(channel, calendar(), sink.clone(), StoreConfig::default());
        assert!(store.load(ab(), calendar()).await.is_err());

        let err = store.add_task(Task::new("c", "C", 1), Position::Last).unwrap_err();
        assert_eq!(err, StoreError::Channel(ChannelError::NotInitialized));
        store.settle().await.unwrap();
        assert!(store.tasks().is_empty());
        assert!(sink.is_empty());

        // Let the abandoned computation finish, then nothing of it may leak in.
        tokio::time::sleep(Duration::from_millis(400)).await;
        store.poll();
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_detached_channel_rejects_mutations() {
        let sink = MemoryEventSink::new();
        let mut store =
            ProjectStore::new(ComputeChannel::detached(), calendar(), sink.clone(), StoreConfig::default());

        let err = store.add_task(Task::new("a", "A", 1), Position::Last).unwrap_err();
        assert_eq!(err, StoreError::Channel(ChannelError::Unavailable));
        assert!(store.tasks().is_empty());
        assert!(!store.can_undo());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_project_file_round_trip() {
        let file = ProjectFile {
            tasks: ab(),
            calendar: calendar(),
        };
        let text = file.to_json().unwrap();
        assert_eq!(ProjectFile::from_json(&text).unwrap(), file);
    }
}
