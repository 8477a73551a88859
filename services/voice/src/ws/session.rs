//! Manages the WebSocket connection lifecycle for a renderer.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast::error::RecvError};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

#[instrument(name = "ws_session", skip_all, fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));
    info!("Renderer connected.");

    let (socket_tx, socket_rx) = socket.split();
    let socket_tx = Arc::new(Mutex::new(socket_tx));

    if let Err(e) = run_session(state, socket_tx, socket_rx).await {
        error!(error = ?e, "Renderer session terminated with error.");
    }
    info!("Renderer disconnected.");
}

/// The main event loop for a connected renderer.
///
/// Forwards scene changes, command results and listening status to the
/// renderer, and serves its ticks and requests.
async fn run_session(
    state: Arc<AppState>,
    socket_tx: SocketSink,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    // Subscribe before taking the snapshot so no change falls in between.
    let mut scene_events = state.scene.subscribe();
    let mut command_results = state.scene.subscribe_commands();
    let mut listening = state.listening_status.clone();

    let status = listening.borrow_and_update().clone();
    let initialized = ServerMessage::Initialized {
        scene: state.scene.snapshot().await?,
        listening: status,
        history: state.scene.history().await?,
    };
    send_msg(&mut *socket_tx.lock().await, initialized).await?;

    loop {
        tokio::select! {
            msg = socket_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => handle_client_message(&state, &socket_tx, msg).await?,
                        Err(e) => {
                            warn!(error = %e, "Ignoring malformed client message.");
                            send_msg(&mut *socket_tx.lock().await, ServerMessage::Error { message: format!("malformed message: {e}") }).await?;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the connection.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                }
            },
            event = scene_events.recv() => match event {
                Ok(event) => send_msg(&mut *socket_tx.lock().await, ServerMessage::SceneEvent { event }).await?,
                Err(RecvError::Lagged(missed)) => warn!(missed, "Renderer fell behind on scene events."),
                Err(RecvError::Closed) => break,
            },
            entry = command_results.recv() => match entry {
                Ok(entry) => send_msg(&mut *socket_tx.lock().await, ServerMessage::CommandResult { entry }).await?,
                Err(RecvError::Lagged(missed)) => warn!(missed, "Renderer fell behind on command results."),
                Err(RecvError::Closed) => break,
            },
            changed = listening.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = listening.borrow_and_update().clone();
                send_msg(&mut *socket_tx.lock().await, ServerMessage::ListeningStatus { status }).await?;
            },
        }
    }
    Ok(())
}

async fn handle_client_message(
    state: &Arc<AppState>,
    socket_tx: &SocketSink,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::Tick { positions } => {
            let forces = state.scene.tick(positions).await?;
            send_msg(&mut *socket_tx.lock().await, ServerMessage::Forces { forces }).await?;
        }
        ClientMessage::Utterance { text } => {
            // The outcome reaches the renderer through the command-result stream.
            let scene = state.scene.clone();
            tokio::spawn(async move {
                if let Err(e) = scene.dispatch(text).await {
                    debug!(error = %e, "Typed command failed");
                }
            });
        }
        ClientMessage::SetListening { enabled } => {
            // Starting may wait on permission and a network handshake.
            let state = state.clone();
            let socket_tx = socket_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = state.set_listening(enabled).await {
                    let _ = send_msg(
                        &mut *socket_tx.lock().await,
                        ServerMessage::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            });
        }
        ClientMessage::SetVolatileProcessing { enabled } => {
            state.volatile.set(enabled);
        }
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
