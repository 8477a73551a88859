//! Audio and transcription collaborators.
//!
//! The listening controller drives these traits; the service crate provides
//! implementations backed by a microphone and a streaming speech-to-text API.

use crate::error::VoiceError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A chunk of captured audio, interleaved `f32` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A transcription hypothesis. Volatile results may still change; final
/// results are committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn volatile(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn committed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Resolves once the user has granted or refused microphone access.
    async fn request_microphone(&self) -> bool;
}

#[async_trait]
pub trait AudioCapture: Send {
    /// Configures the input device. Nothing is captured yet.
    async fn prepare(&mut self) -> Result<(), VoiceError>;
    /// Starts delivering buffers on the returned channel.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBuffer>, VoiceError>;
    /// Removes the tap and closes the buffer channel.
    async fn stop(&mut self);
}

#[async_trait]
pub trait SpeechTranscriber: Send {
    /// Checks the language model is available and sets up the session.
    async fn prepare(&mut self) -> Result<(), VoiceError>;
    /// Consumes audio and yields transcription results until the audio ends or
    /// `finish` is called.
    async fn start(
        &mut self,
        audio: mpsc::Receiver<AudioBuffer>,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, VoiceError>;
    /// Finalizes the session and releases its resources.
    async fn finish(&mut self);
}
