//! Undo/redo ledger of event-pair actions.

use std::collections::VecDeque;

use super::events::QueuedEvent;

pub type ActionId = u64;

/// One undoable step: the events that performed it and the events that
/// invert it. `backward[i]` inverts `forward[i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryAction {
    pub id: ActionId,
    pub label: String,
    pub forward: Vec<QueuedEvent>,
    pub backward: Vec<QueuedEvent>,
}

/// Events to replay for an undo or redo.
#[derive(Clone, Debug, PartialEq)]
pub struct Replay {
    pub action_id: ActionId,
    pub label: String,
    pub events: Vec<QueuedEvent>,
}

#[derive(Debug)]
pub struct HistoryLedger {
    undo: VecDeque<HistoryAction>,
    redo: Vec<HistoryAction>,
    open: Option<HistoryAction>,
    depth: usize,
    next_id: ActionId,
    limit: usize,
}

impl HistoryLedger {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            open: None,
            depth: 0,
            next_id: 1,
            limit: limit.max(1),
        }
    }

    fn allocate(&mut self, label: &str) -> HistoryAction {
        let id = self.next_id;
        self.next_id += 1;
        HistoryAction {
            id,
            label: label.to_string(),
            forward: Vec::new(),
            backward: Vec::new(),
        }
    }

    fn push(&mut self, action: HistoryAction) {
        self.redo.clear();
        self.undo.push_back(action);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    /// Record an action, or append to the open composite.
    pub fn record(
        &mut self,
        label: &str,
        forward: Vec<QueuedEvent>,
        backward: Vec<QueuedEvent>,
    ) -> ActionId {
        if let Some(open) = self.open.as_mut() {
            open.forward.extend(forward);
            open.backward.extend(backward);
            return open.id;
        }
        let mut action = self.allocate(label);
        action.forward = forward;
        action.backward = backward;
        let id = action.id;
        self.push(action);
        id
    }

    /// Open a composite. Nested calls join the outer composite.
    pub fn begin_composite(&mut self, label: &str) -> ActionId {
        self.depth += 1;
        if let Some(open) = &self.open {
            return open.id;
        }
        let action = self.allocate(label);
        let id = action.id;
        self.open = Some(action);
        id
    }

    /// Close the composite. Returns its id once the outermost level closes
    /// with at least one event recorded.
    pub fn end_composite(&mut self) -> Option<ActionId> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return None;
        }
        let action = self.open.take()?;
        if action.forward.is_empty() {
            return None;
        }
        let id = action.id;
        self.push(action);
        Some(id)
    }

    /// Discard the open composite and everything recorded into it.
    pub fn cancel_composite(&mut self) -> Option<HistoryAction> {
        self.depth = 0;
        self.open.take()
    }

    pub fn in_composite(&self) -> bool {
        self.open.is_some()
    }

    /// Pop the latest action onto the redo stack and return its inverse
    /// events, last first.
    pub fn undo(&mut self) -> Option<Replay> {
        let action = self.undo.pop_back()?;
        let replay = Replay {
            action_id: action.id,
            label: action.label.clone(),
            events: action.backward.iter().rev().cloned().collect(),
        };
        self.redo.push(action);
        Some(replay)
    }

    /// Pop the latest undone action back onto the undo stack and return its
    /// forward events in order.
    pub fn redo(&mut self) -> Option<Replay> {
        let action = self.redo.pop()?;
        let replay = Replay {
            action_id: action.id,
            label: action.label.clone(),
            events: action.forward.clone(),
        };
        self.undo.push_back(action);
        Some(replay)
    }

    /// Remove an action without replaying it. Used when the mutation it
    /// describes is rolled back.
    pub fn revoke(&mut self, id: ActionId) -> bool {
        if self.open.as_ref().is_some_and(|a| a.id == id) {
            self.cancel_composite();
            return true;
        }
        if let Some(pos) = self.undo.iter().position(|a| a.id == id) {
            self.undo.remove(pos);
            return true;
        }
        if let Some(pos) = self.redo.iter().position(|a| a.id == id) {
            self.redo.remove(pos);
            return true;
        }
        false
    }

    /// Put back an action whose undo replay failed.
    pub fn reinstate_undo(&mut self, id: ActionId) -> bool {
        match self.redo.iter().rposition(|a| a.id == id) {
            Some(pos) => {
                let action = self.redo.remove(pos);
                self.undo.push_back(action);
                true
            }
            None => false,
        }
    }

    /// Put back an action whose redo replay failed.
    pub fn reinstate_redo(&mut self, id: ActionId) -> bool {
        match self.undo.iter().rposition(|a| a.id == id) {
            Some(pos) => {
                if let Some(action) = self.undo.remove(pos) {
                    self.redo.push(action);
                }
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo.back().map(|a| a.label.as_str())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(|a| a.label.as_str())
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(100)
    }
}
