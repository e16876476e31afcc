//! Persistence port for confirmed events.

use std::sync::{Arc, Mutex};

use crate::history::QueuedEvent;

/// Receives events once the engine has confirmed the change that produced
/// them. Rolled-back changes never reach the sink.
pub trait EventSink: Send {
    fn persist(&mut self, events: &[QueuedEvent]);
}

/// Sink that keeps events in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<QueuedEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueuedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialized events, oldest first.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.events())
    }
}

impl EventSink for MemoryEventSink {
    fn persist(&mut self, events: &[QueuedEvent]) {
        let mut buffer = match self.events.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.extend_from_slice(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_buffer() {
        let sink = MemoryEventSink::new();
        let mut writer = sink.clone();
        writer.persist(&[QueuedEvent::deleted(&"a".into())]);
        assert_eq!(sink.len(), 1);
        let json = sink.to_json().unwrap();
        assert_eq!(json[0]["payload"]["type"], serde_json::json!("TASK_DELETED"));
    }
}
