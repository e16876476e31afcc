//! Bookkeeping for optimistic mutations awaiting the engine.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::calendar::Calendar;
use crate::channel::RequestId;
use crate::history::{ActionId, QueuedEvent};
use crate::models::{Task, TaskId};

/// Pre-mutation state. Cloning shares every task.
#[derive(Clone, Debug)]
pub(crate) struct Snapshot {
    pub tasks: Arc<Vec<Arc<Task>>>,
    pub calendar: Arc<Calendar>,
}

/// What produced a pending operation, and so what a rollback must undo in
/// the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A user mutation; holds its recorded action, if any.
    User(Option<ActionId>),
    Undo(ActionId),
    Redo(ActionId),
    Load,
    Import,
    /// A forced recomputation with no local change.
    Recalculate,
    /// Realignment of the engine after a rollback.
    Resync,
}

#[derive(Debug)]
pub(crate) struct PendingOperation {
    /// Requests still waiting for a final response.
    pub requests: Vec<RequestId>,
    pub kind: &'static str,
    pub target: Option<TaskId>,
    pub snapshot: Snapshot,
    pub origin: Origin,
    /// Events for the persistence sink, held until confirmation.
    pub outbox: Vec<QueuedEvent>,
    pub touches_calendar: bool,
}

impl PendingOperation {
    pub fn new(kind: &'static str, snapshot: Snapshot, origin: Origin) -> Self {
        Self {
            requests: Vec::new(),
            kind,
            target: None,
            snapshot,
            origin,
            outbox: Vec::new(),
            touches_calendar: false,
        }
    }

    pub fn with_target(mut self, target: &TaskId) -> Self {
        self.target = Some(target.clone());
        self
    }

    pub fn with_outbox(mut self, events: Vec<QueuedEvent>) -> Self {
        self.outbox = events;
        self
    }
}

/// Outstanding operations in dispatch order. The worker answers FIFO, so
/// the front is always the next to complete.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    ops: VecDeque<PendingOperation>,
}

impl PendingQueue {
    pub fn push(&mut self, op: PendingOperation) {
        if !op.requests.is_empty() {
            self.ops.push_back(op);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Index of the operation waiting on `id`.
    pub fn position(&self, id: RequestId) -> Option<usize> {
        self.ops.iter().position(|op| op.requests.contains(&id))
    }

    /// Mark `id` answered. Returns the operation if that was its last request.
    pub fn complete(&mut self, index: usize, id: RequestId) -> Option<PendingOperation> {
        let op = self.ops.get_mut(index)?;
        op.requests.retain(|r| *r != id);
        if op.requests.is_empty() {
            self.ops.remove(index)
        } else {
            None
        }
    }

    /// Remove the operation at `index` and everything dispatched after it.
    pub fn split_off(&mut self, index: usize) -> Vec<PendingOperation> {
        self.ops.split_off(index).into_iter().collect()
    }

    pub fn drain(&mut self) -> Vec<PendingOperation> {
        self.ops.drain(..).collect()
    }
}
