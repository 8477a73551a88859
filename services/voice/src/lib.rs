//! Voicecraft Service Library Crate
//!
//! Hosts the voice-command scene behind a WebSocket for the renderer and a
//! small REST API, and provides the microphone capture and realtime
//! transcription the listening controller runs on. The binary in `bin/` is a
//! thin wrapper around this library.

pub mod audio_utils;
pub mod capture;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod transcription;
pub mod ws;
