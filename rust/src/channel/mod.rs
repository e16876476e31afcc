//! Request/response channel between the store and the compute worker.

mod client;
mod protocol;
mod worker;

pub use client::{ChannelError, ComputeChannel};
pub use protocol::{Command, CommandEnvelope, RequestId, Response, ResponseEnvelope};
