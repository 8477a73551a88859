//! Axum Router Configuration

use crate::{handlers, state::AppState, ws::ws_handler};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/commands", post(handlers::submit_command))
        .route(
            "/history",
            get(handlers::get_history).delete(handlers::clear_history),
        )
        .route("/scene", get(handlers::get_scene))
        .route(
            "/listening",
            get(handlers::get_listening).post(handlers::update_listening),
        )
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}
