//! Persistence events: the unit of history and of the outbound event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::models::{FieldChange, Task, TaskId};
use crate::order_key::OrderKey;

/// What happened to a task or to the calendar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    TaskCreated {
        task: Box<Task>,
    },
    /// One field set to a new value.
    TaskUpdated(FieldChange),
    TaskDeleted,
    TaskMoved {
        old_parent: Option<TaskId>,
        new_parent: Option<TaskId>,
        old_sort_key: OrderKey,
        new_sort_key: OrderKey,
    },
    CalendarUpdated {
        calendar: Calendar,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "TASK_CREATED",
            Self::TaskUpdated(_) => "TASK_UPDATED",
            Self::TaskDeleted => "TASK_DELETED",
            Self::TaskMoved { .. } => "TASK_MOVED",
            Self::CalendarUpdated { .. } => "CALENDAR_UPDATED",
        }
    }
}

/// An event waiting to be handed to the persistence sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// The task the event applies to; None for calendar events.
    pub target_id: Option<TaskId>,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl QueuedEvent {
    pub fn new(target_id: Option<TaskId>, payload: EventPayload) -> Self {
        Self {
            target_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn created(task: &Task) -> Self {
        Self::new(
            Some(task.id.clone()),
            EventPayload::TaskCreated {
                task: Box::new(task.clone()),
            },
        )
    }

    pub fn updated(id: &TaskId, change: FieldChange) -> Self {
        Self::new(Some(id.clone()), EventPayload::TaskUpdated(change))
    }

    pub fn deleted(id: &TaskId) -> Self {
        Self::new(Some(id.clone()), EventPayload::TaskDeleted)
    }

    pub fn moved(
        id: &TaskId,
        old_parent: Option<TaskId>,
        new_parent: Option<TaskId>,
        old_sort_key: OrderKey,
        new_sort_key: OrderKey,
    ) -> Self {
        Self::new(
            Some(id.clone()),
            EventPayload::TaskMoved {
                old_parent,
                new_parent,
                old_sort_key,
                new_sort_key,
            },
        )
    }

    pub fn calendar(calendar: &Calendar) -> Self {
        Self::new(
            None,
            EventPayload::CalendarUpdated {
                calendar: calendar.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_wire_shapes() {
        let updated = QueuedEvent::updated(&"a".into(), FieldChange::Duration(4));
        let json = serde_json::to_value(&updated).unwrap();
        assert_eq!(json["target_id"], serde_json::json!("a"));
        assert_eq!(
            json["payload"],
            serde_json::json!({"type": "TASK_UPDATED", "field": "duration", "new_value": 4})
        );

        let deleted = serde_json::to_value(QueuedEvent::deleted(&"a".into())).unwrap();
        assert_eq!(deleted["payload"], serde_json::json!({"type": "TASK_DELETED"}));

        let cal = Calendar::weekdays(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let event = QueuedEvent::calendar(&cal);
        assert_eq!(event.payload.kind(), "CALENDAR_UPDATED");
        assert!(event.target_id.is_none());
    }

    #[test]
    fn test_events_deserialize() {
        let event = QueuedEvent::moved(
            &"a".into(),
            None,
            Some("p".into()),
            OrderKey::default(),
            OrderKey::parse("a1").unwrap(),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: QueuedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);

        let created = QueuedEvent::created(&Task::new("a", "A", 2));
        let json = serde_json::to_string(&created).unwrap();
        let back: QueuedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, created);
    }
}
