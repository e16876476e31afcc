//! The project store and its collaborators: local validation, pending
//! operation tracking, the persistence port, and error notices.

mod core;
mod error;
mod pending;
mod sink;
pub mod validation;

pub use core::{ProjectFile, ProjectSnapshot, ProjectStore, VisibleTask};
pub use error::{Notice, NoticeLevel, StoreError};
pub use sink::{EventSink, MemoryEventSink};
pub use validation::ValidationError;

pub use crate::tree::Position;
