//! Controller-side handle to the compute worker.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::calendar::Calendar;
use crate::config::ChannelConfig;
use crate::models::Task;
use crate::scheduler::ScheduleCompute;

use super::protocol::{Command, CommandEnvelope, RequestId, Response, ResponseEnvelope};
use super::worker;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The worker was never started or has stopped.
    #[error("Scheduling engine is unavailable")]
    Unavailable,
    #[error("Scheduling engine did not initialize within {0:?}")]
    InitializationTimeout(Duration),
    #[error("Scheduling engine rejected the project: {0}")]
    InitializationFailed(String),
    /// An initialization was abandoned; the worker may hold a project the
    /// caller never accepted.
    #[error("Scheduling engine has no accepted project")]
    NotInitialized,
}

/// Request/response pipe to a compute worker on a blocking thread.
///
/// Commands are answered in the order they were dispatched. Each response
/// carries the id of its command; a calculation older than the latest one
/// dispatched is stale.
pub struct ComputeChannel {
    commands: Option<UnboundedSender<CommandEnvelope>>,
    responses: Option<UnboundedReceiver<ResponseEnvelope>>,
    /// Responses read while waiting for a handshake, replayed by `recv`.
    backlog: VecDeque<ResponseEnvelope>,
    last_id: RequestId,
    latest_calculation: Option<RequestId>,
    in_flight: BTreeSet<RequestId>,
    init_timeout: Duration,
    /// Set when a handshake timed out. Only `Initialize` is accepted until
    /// one succeeds.
    abandoned: bool,
    worker: Option<JoinHandle<()>>,
}

impl ComputeChannel {
    /// Start a worker running `engine`. Must be called inside a tokio runtime.
    pub fn spawn<E: ScheduleCompute>(engine: E, config: &ChannelConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || worker::run(engine, cmd_rx, resp_tx));
        Self {
            commands: Some(cmd_tx),
            responses: Some(resp_rx),
            backlog: VecDeque::new(),
            last_id: RequestId::READY,
            latest_calculation: None,
            in_flight: BTreeSet::new(),
            init_timeout: config.init_timeout(),
            abandoned: false,
            worker: Some(handle),
        }
    }

    /// A channel with no worker behind it. Every command fails with
    /// `ChannelError::Unavailable`.
    pub fn detached() -> Self {
        Self {
            commands: None,
            responses: None,
            backlog: VecDeque::new(),
            last_id: RequestId::READY,
            latest_calculation: None,
            in_flight: BTreeSet::new(),
            init_timeout: ChannelConfig::default().init_timeout(),
            abandoned: false,
            worker: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.commands.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Send a command and return the id its answers will carry.
    pub fn dispatch(&mut self, command: Command) -> Result<RequestId, ChannelError> {
        let sender = self.commands.as_ref().ok_or(ChannelError::Unavailable)?;
        if self.abandoned && !matches!(command, Command::Initialize { .. }) {
            return Err(ChannelError::NotInitialized);
        }
        let id = self.last_id.next();
        let kind = command.kind();
        let expects_response = command.expects_response();
        sender
            .send(CommandEnvelope { id, command })
            .map_err(|_| ChannelError::Unavailable)?;
        self.last_id = id;
        if expects_response {
            self.in_flight.insert(id);
            self.latest_calculation = Some(id);
        }
        debug!(request = %id, command = kind, "dispatched");
        Ok(id)
    }

    /// Send `Initialize` and wait for the worker's `Initialized` answer.
    ///
    /// The calculation result that follows is left for `recv`. On timeout the
    /// request is abandoned and no other command is accepted until a later
    /// initialization succeeds; there is no retry.
    pub async fn initialize(
        &mut self,
        tasks: Vec<Task>,
        calendar: Calendar,
    ) -> Result<RequestId, ChannelError> {
        let id = self.dispatch(Command::Initialize { tasks, calendar })?;
        let timeout = self.init_timeout;
        match tokio::time::timeout(timeout, self.await_handshake(id)).await {
            Ok(Ok(id)) => {
                self.abandoned = false;
                Ok(id)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(request = %id, ?timeout, "initialization timed out");
                self.in_flight.remove(&id);
                self.abandoned = true;
                Err(ChannelError::InitializationTimeout(timeout))
            }
        }
    }

    async fn await_handshake(&mut self, id: RequestId) -> Result<RequestId, ChannelError> {
        loop {
            let envelope = self.read().await.ok_or(ChannelError::Unavailable)?;
            match envelope.response {
                Response::Initialized { success: true } if envelope.id == id => return Ok(id),
                Response::Initialized { success: false } if envelope.id == id => {
                    // The error explaining the failure follows.
                    let message = match self.read().await {
                        Some(ResponseEnvelope {
                            response: Response::Error { message },
                            ..
                        }) => message,
                        _ => "unknown error".to_string(),
                    };
                    self.in_flight.remove(&id);
                    return Err(ChannelError::InitializationFailed(message));
                }
                Response::Ready => {}
                _ => {
                    self.settle_bookkeeping(&envelope);
                    self.backlog.push_back(envelope);
                }
            }
        }
    }

    async fn read(&mut self) -> Option<ResponseEnvelope> {
        self.responses.as_mut()?.recv().await
    }

    fn settle_bookkeeping(&mut self, envelope: &ResponseEnvelope) {
        if envelope.response.is_final() {
            self.in_flight.remove(&envelope.id);
        }
    }

    /// Next response, waiting if none is ready. None once the worker is gone.
    pub async fn recv(&mut self) -> Option<ResponseEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        let envelope = self.read().await?;
        self.settle_bookkeeping(&envelope);
        Some(envelope)
    }

    /// Next response if one is ready.
    pub fn try_recv(&mut self) -> Option<ResponseEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        let envelope = self.responses.as_mut()?.try_recv().ok()?;
        self.settle_bookkeeping(&envelope);
        Some(envelope)
    }

    /// Whether any dispatched request is still unanswered.
    pub fn is_busy(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    /// Id of the most recent request that will produce a calculation.
    pub fn latest(&self) -> Option<RequestId> {
        self.latest_calculation
    }

    /// Whether a result for `id` has been superseded by a later request.
    pub fn is_stale(&self, id: RequestId) -> bool {
        self.latest_calculation.is_some_and(|latest| id < latest)
    }

    /// Stop the worker. Unanswered requests are abandoned.
    pub fn dispose(&mut self) {
        if let Some(sender) = self.commands.take() {
            let id = self.last_id.next();
            self.last_id = id;
            let _ = sender.send(CommandEnvelope {
                id,
                command: Command::Dispose,
            });
        }
        self.in_flight.clear();
        self.worker.take();
    }
}

impl Drop for ComputeChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}
