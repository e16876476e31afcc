//! Store errors and the user-facing notices they map to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelError;
use crate::order_key::OrderKeyError;

use super::validation::ValidationError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The engine rejected a change; the change was rolled back.
    #[error("Schedule computation failed: {0}")]
    Compute(String),
    #[error(transparent)]
    OrderKey(#[from] OrderKeyError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A short message for the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }
}

impl StoreError {
    /// The single notice shown for this error. Engine output is summarized,
    /// never passed through.
    pub fn notice(&self) -> Notice {
        match self {
            Self::Validation(err) => Notice::new(NoticeLevel::Warning, err.to_string()),
            Self::Channel(ChannelError::Unavailable) => Notice::new(
                NoticeLevel::Error,
                "The scheduling engine is not running. The change was not applied.",
            ),
            Self::Channel(ChannelError::InitializationTimeout(_)) => Notice::new(
                NoticeLevel::Error,
                "The scheduling engine did not start in time.",
            ),
            Self::Channel(ChannelError::NotInitialized) => Notice::new(
                NoticeLevel::Error,
                "Load a project before making changes.",
            ),
            Self::Channel(ChannelError::InitializationFailed(_)) => Notice::new(
                NoticeLevel::Error,
                "The project could not be scheduled and was not loaded.",
            ),
            Self::Compute(message) if message.contains("Circular dependency") => Notice::new(
                NoticeLevel::Error,
                "The change would create a circular dependency and was undone.",
            ),
            Self::Compute(_) => Notice::new(
                NoticeLevel::Error,
                "The schedule could not be recalculated. The change was undone.",
            ),
            Self::OrderKey(_) => Notice::new(
                NoticeLevel::Error,
                "The task could not be placed at that position.",
            ),
        }
    }
}
