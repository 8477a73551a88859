//! Shared Application State
//!
//! Handlers reach the scene through its runtime handle and the microphone
//! session through the listening controller. The listening status and the
//! fast-path flag are kept outside the controller's lock, so reading them
//! never waits on a permission prompt or a transcriber handshake.

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use voicecraft_core::{
    error::VoiceError,
    listening::{ListeningController, ListeningSnapshot, VolatileSwitch},
    runtime::SceneHandle,
};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub scene: SceneHandle,
    /// Held for the whole of a start or stop.
    pub listening: Arc<Mutex<ListeningController>>,
    pub listening_status: watch::Receiver<ListeningSnapshot>,
    pub volatile: VolatileSwitch,
}

impl AppState {
    pub fn new(scene: SceneHandle, listening: ListeningController) -> Self {
        Self {
            scene,
            listening_status: listening.subscribe(),
            volatile: listening.volatile_switch(),
            listening: Arc::new(Mutex::new(listening)),
        }
    }

    pub fn listening_snapshot(&self) -> ListeningSnapshot {
        self.listening_status.borrow().clone()
    }

    /// Starts or stops the microphone session. Starting while already
    /// listening and stopping while idle are no-ops.
    pub async fn set_listening(&self, enabled: bool) -> Result<(), VoiceError> {
        let mut listening = self.listening.lock().await;
        if enabled {
            listening.start().await
        } else {
            listening.stop().await;
            Ok(())
        }
    }
}
