//! Scene Runtime
//!
//! A single task owns the `CommandDispatcher`. Ticks, history requests and
//! command application reach it through one channel and are handled one at a
//! time, so a force pass never observes a half-applied mutation.
//!
//! Classification and extraction wait on the model, so they run on the
//! caller's task. The scene task only stamps a command before it is
//! interpreted and applies it afterwards.

use crate::{
    SceneEvent,
    attraction::{Body, EntityForce},
    dispatcher::{
        Command, CommandDispatcher, CommandInterpreter, DispatchOutcome, Interpretation,
        SceneSnapshot,
    },
    error::CommandError,
    history::CommandLogEntry,
    listening::CommandSink,
};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, instrument};

const REQUEST_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

enum SceneRequest {
    Begin {
        text: String,
        reply: oneshot::Sender<(Command, bool)>,
    },
    Conclude {
        command: Command,
        interpreted: Result<Interpretation, CommandError>,
        reply: oneshot::Sender<Result<DispatchOutcome, CommandError>>,
    },
    Tick {
        reported: Vec<Body>,
        reply: oneshot::Sender<Vec<EntityForce>>,
    },
    History {
        reply: oneshot::Sender<Vec<CommandLogEntry>>,
    },
    ClearHistory {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SceneSnapshot>,
    },
}

/// Cloneable handle to a running scene.
#[derive(Clone)]
pub struct SceneHandle {
    requests: mpsc::Sender<SceneRequest>,
    interpreter: CommandInterpreter,
    events: broadcast::Sender<SceneEvent>,
    commands: broadcast::Sender<CommandLogEntry>,
}

impl SceneHandle {
    /// Moves `dispatcher` onto its own task and returns a handle to it.
    ///
    /// The task ends when the last handle is dropped.
    pub fn spawn(dispatcher: CommandDispatcher) -> Self {
        let (requests, rx) = mpsc::channel(REQUEST_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, _) = broadcast::channel(EVENT_CAPACITY);
        let interpreter = dispatcher.interpreter().clone();
        tokio::spawn(run(dispatcher, rx, events.clone(), commands.clone()));
        Self {
            requests,
            interpreter,
            events,
            commands,
        }
    }

    /// Scene changes, in the order they were applied.
    pub fn subscribe(&self) -> broadcast::Receiver<SceneEvent> {
        self.events.subscribe()
    }

    /// One log entry per processed command.
    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandLogEntry> {
        self.commands.subscribe()
    }

    /// Interprets `text` on the calling task and applies the result on the
    /// scene task.
    ///
    /// Commands dispatched concurrently are applied in the order their
    /// interpretation finishes.
    #[instrument(skip(self, text))]
    pub async fn dispatch(&self, text: impl Into<String>) -> Result<DispatchOutcome, CommandError> {
        let text = text.into();
        let (command, has_active_entity) = self.request(|reply| SceneRequest::Begin { text, reply }).await?;
        let interpreted = self.interpreter.interpret(&command.text, has_active_entity).await;
        self.request(|reply| SceneRequest::Conclude {
            command,
            interpreted,
            reply,
        })
        .await?
    }

    pub async fn tick(&self, reported: Vec<Body>) -> Result<Vec<EntityForce>, CommandError> {
        self.request(|reply| SceneRequest::Tick { reported, reply }).await
    }

    pub async fn history(&self) -> Result<Vec<CommandLogEntry>, CommandError> {
        self.request(|reply| SceneRequest::History { reply }).await
    }

    pub async fn clear_history(&self) -> Result<(), CommandError> {
        self.request(|reply| SceneRequest::ClearHistory { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SceneSnapshot, CommandError> {
        self.request(|reply| SceneRequest::Snapshot { reply }).await
    }

    /// Sends one classification request so the first spoken command does not
    /// pay the service's cold-start latency.
    pub async fn warmup(&self) -> Result<(), CommandError> {
        self.interpreter.classifier().warmup().await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SceneRequest,
    ) -> Result<T, CommandError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| CommandError::SceneUnavailable)?;
        response.await.map_err(|_| CommandError::SceneUnavailable)
    }
}

#[async_trait]
impl CommandSink for SceneHandle {
    async fn submit(&self, text: &str) -> Result<DispatchOutcome, CommandError> {
        self.dispatch(text).await
    }
}

async fn run(
    mut dispatcher: CommandDispatcher,
    mut requests: mpsc::Receiver<SceneRequest>,
    events: broadcast::Sender<SceneEvent>,
    commands: broadcast::Sender<CommandLogEntry>,
) {
    info!("Scene runtime started");
    while let Some(request) = requests.recv().await {
        match request {
            SceneRequest::Begin { text, reply } => {
                let command = dispatcher.begin(&text);
                let _ = reply.send((command, dispatcher.has_active_entity()));
            }
            SceneRequest::Conclude {
                command,
                interpreted,
                reply,
            } => {
                let result = dispatcher.conclude(command, interpreted);
                if let Ok(outcome) = &result {
                    for event in &outcome.events {
                        // No subscribers is fine; the renderer may not be attached yet.
                        let _ = events.send(event.clone());
                    }
                }
                if let Some(entry) = dispatcher.history().last() {
                    let _ = commands.send(entry.clone());
                }
                if reply.send(result).is_err() {
                    debug!("Dispatch caller went away before the result was ready");
                }
            }
            SceneRequest::Tick { reported, reply } => {
                let _ = reply.send(dispatcher.tick(&reported));
            }
            SceneRequest::History { reply } => {
                let _ = reply.send(dispatcher.history().entries());
            }
            SceneRequest::ClearHistory { reply } => {
                dispatcher.clear_history();
                let _ = reply.send(());
            }
            SceneRequest::Snapshot { reply } => {
                let _ = reply.send(dispatcher.snapshot());
            }
        }
    }
    info!("Scene runtime stopped");
}
