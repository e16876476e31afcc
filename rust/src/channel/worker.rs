//! The compute worker loop. Runs on a blocking thread and owns its own copy
//! of the project.

use rustc_hash::FxHashSet;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::calendar::Calendar;
use crate::models::{Task, TaskId};
use crate::scheduler::{ScheduleCompute, ScheduleOutcome};
use crate::tree;

use super::protocol::{Command, CommandEnvelope, RequestId, Response, ResponseEnvelope};

/// The worker's authoritative copy of the project.
#[derive(Clone, Debug)]
struct Project {
    tasks: Vec<Task>,
    calendar: Calendar,
}

struct Worker<E> {
    engine: E,
    project: Option<Project>,
    responses: UnboundedSender<ResponseEnvelope>,
}

impl<E: ScheduleCompute> Worker<E> {
    /// Send a response. Returns false once the client is gone.
    fn send(&self, id: RequestId, response: Response) -> bool {
        self.responses
            .send(ResponseEnvelope::new(id, response))
            .is_ok()
    }

    fn result(outcome: ScheduleOutcome) -> Response {
        Response::CalculationResult {
            tasks: outcome.tasks,
            stats: outcome.stats,
        }
    }

    fn error(message: impl Into<String>) -> Response {
        Response::Error {
            message: message.into(),
        }
    }

    /// Recompute `candidate`; keep it only if the engine accepts it.
    fn commit(&mut self, candidate: Project) -> Response {
        match self.engine.compute(&candidate.tasks, &candidate.calendar) {
            Ok(outcome) => {
                self.project = Some(Project {
                    tasks: outcome.tasks.clone(),
                    calendar: candidate.calendar,
                });
                Self::result(outcome)
            }
            Err(err) => Self::error(err.to_string()),
        }
    }

    /// Apply `edit` to a scratch copy of the project, then commit it.
    fn mutate(&mut self, edit: impl FnOnce(&mut Project) -> Result<(), String>) -> Response {
        let Some(current) = &self.project else {
            return Self::error("Engine not initialized");
        };
        let mut scratch = current.clone();
        if let Err(message) = edit(&mut scratch) {
            return Self::error(message);
        }
        self.commit(scratch)
    }

    /// Handle one command. Returns false when the loop should stop.
    fn handle(&mut self, envelope: CommandEnvelope) -> bool {
        let CommandEnvelope { id, command } = envelope;
        debug!(request = %id, command = command.kind(), "worker command");

        let response = match command {
            Command::Dispose => return false,
            Command::Initialize { tasks, calendar } => {
                let response = self.commit(Project { tasks, calendar });
                let success = matches!(response, Response::CalculationResult { .. });
                if !self.send(id, Response::Initialized { success }) {
                    return false;
                }
                response
            }
            Command::SyncTasks { tasks } => {
                let Some(project) = self.project.as_mut() else {
                    return self.send(id, Self::error("Engine not initialized"));
                };
                project.tasks = tasks;
                if !self.send(id, Response::TasksSynced) {
                    return false;
                }
                match &self.project {
                    Some(project) => {
                        let candidate = project.clone();
                        self.commit(candidate)
                    }
                    None => Self::error("Engine not initialized"),
                }
            }
            Command::AddTask { task } => self.mutate(|p| {
                if p.tasks.iter().any(|t| t.id == task.id) {
                    return Err(format!("Task {} already exists", task.id));
                }
                p.tasks.push(*task);
                tree::arrange(&mut p.tasks);
                Ok(())
            }),
            Command::UpdateTask { id: task_id, patch } => self.mutate(|p| {
                let task = p
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or_else(|| format!("Unknown task {task_id}"))?;
                patch.apply(task);
                tree::arrange(&mut p.tasks);
                Ok(())
            }),
            Command::DeleteTask { id: task_id } => self.mutate(|p| {
                let removed: FxHashSet<TaskId> =
                    tree::cascade_ids(&p.tasks, &task_id).into_iter().collect();
                if removed.is_empty() {
                    return Err(format!("Unknown task {task_id}"));
                }
                for (dependent, kept) in tree::stripped_dependencies(&p.tasks, &removed) {
                    if let Some(task) = p.tasks.iter_mut().find(|t| t.id == dependent) {
                        task.dependencies = kept;
                    }
                }
                p.tasks.retain(|t| !removed.contains(&t.id));
                Ok(())
            }),
            Command::UpdateCalendar { calendar } => self.mutate(|p| {
                p.calendar = calendar;
                Ok(())
            }),
            Command::Calculate => match &self.project {
                Some(project) => {
                    let candidate = project.clone();
                    self.commit(candidate)
                }
                None => Self::error("Engine not initialized"),
            },
        };

        if let Response::Error { message } = &response {
            warn!(request = %id, %message, "computation failed");
        }
        self.send(id, response)
    }
}

/// Worker entry point: announce readiness, then answer commands in order
/// until `Dispose` or until either side of the channel closes.
pub(crate) fn run<E: ScheduleCompute>(
    engine: E,
    mut commands: UnboundedReceiver<CommandEnvelope>,
    responses: UnboundedSender<ResponseEnvelope>,
) {
    let mut worker = Worker {
        engine,
        project: None,
        responses,
    };
    if !worker.send(RequestId::READY, Response::Ready) {
        return;
    }
    while let Some(envelope) = commands.blocking_recv() {
        if !worker.handle(envelope) {
            break;
        }
    }
    debug!("compute worker stopped");
}
