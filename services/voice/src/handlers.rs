//! Axum Handlers for the REST API
//!
//! Typed commands, the command history, the scene snapshot and the listening
//! switch. Scene changes themselves are only pushed over the WebSocket.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, warn};
use voicecraft_core::{
    dispatcher::{DispatchOutcome, SceneSnapshot},
    error::{CommandError, VoiceError},
    history::CommandLogEntry,
    listening::ListeningSnapshot,
};

use crate::{
    models::{ErrorResponse, SubmitCommandPayload, UpdateListeningPayload},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Command(CommandError),
    Voice(VoiceError),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Command(err) => {
                let status = match err {
                    CommandError::NoActiveEntity(_) | CommandError::UnrecognizedActionKind(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    CommandError::ClassificationFailure(_)
                    | CommandError::ExtractionFailure { .. } => StatusCode::BAD_GATEWAY,
                    CommandError::SceneUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.to_string())
            }
            ApiError::Voice(err) => {
                warn!(error = %err, "Listening could not start");
                let status = match err {
                    VoiceError::PermissionDenied => StatusCode::FORBIDDEN,
                    VoiceError::AudioSetupFailure(_) | VoiceError::TranscriberSetupFailure(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, err.to_string())
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Runs a typed command through the same pipeline as a spoken one.
pub async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitCommandPayload>,
) -> Result<Json<DispatchOutcome>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let outcome = state
        .scene
        .dispatch(payload.text)
        .await
        .map_err(ApiError::Command)?;
    Ok(Json(outcome))
}

/// The most recent commands, oldest first.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CommandLogEntry>>, ApiError> {
    let entries = state.scene.history().await.map_err(ApiError::Command)?;
    Ok(Json(entries))
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.scene.clear_history().await.map_err(ApiError::Command)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_scene(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SceneSnapshot>, ApiError> {
    let snapshot = state.scene.snapshot().await.map_err(ApiError::Command)?;
    Ok(Json(snapshot))
}

pub async fn get_listening(State(state): State<Arc<AppState>>) -> Json<ListeningSnapshot> {
    Json(state.listening_snapshot())
}

/// Applies the fast-path flag first, then starts or stops listening, and
/// returns the resulting status.
pub async fn update_listening(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateListeningPayload>,
) -> Result<Json<ListeningSnapshot>, ApiError> {
    if let Some(enabled) = payload.volatile_processing {
        state.volatile.set(enabled);
    }
    if let Some(enabled) = payload.enabled {
        state.set_listening(enabled).await.map_err(ApiError::Voice)?;
    }
    Ok(Json(state.listening_snapshot()))
}
