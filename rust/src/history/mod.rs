//! Edit history: persistence events and the undo/redo ledger.

mod events;
mod ledger;

pub use events::{EventPayload, QueuedEvent};
pub use ledger::{ActionId, HistoryAction, HistoryLedger, Replay};
