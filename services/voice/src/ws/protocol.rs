//! Defines the WebSocket message protocol between the renderer and the service.

use serde::{Deserialize, Serialize};
use voicecraft_core::{
    SceneEvent,
    attraction::{Body, EntityForce},
    dispatcher::SceneSnapshot,
    history::CommandLogEntry,
    listening::ListeningSnapshot,
};

/// Messages sent from the renderer to the server.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Current positions of simulated entities, sent once per frame.
    Tick { positions: Vec<Body> },
    /// A command typed instead of spoken.
    Utterance { text: String },
    /// Starts or stops the microphone session.
    SetListening { enabled: bool },
    /// Turns the volatile fast path on or off.
    SetVolatileProcessing { enabled: bool },
}

/// Messages sent from the server to the renderer.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection.
    Initialized {
        scene: SceneSnapshot,
        listening: ListeningSnapshot,
        history: Vec<CommandLogEntry>,
    },
    SceneEvent { event: SceneEvent },
    /// Reply to a `tick`. Empty while the simulation is off.
    Forces { forces: Vec<EntityForce> },
    CommandResult { entry: CommandLogEntry },
    ListeningStatus { status: ListeningSnapshot },
    Error { message: String },
}
