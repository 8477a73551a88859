//! Error taxonomy for the voice-command pipeline.
//!
//! Setup failures (`VoiceError`) end a listening session. Per-command failures
//! (`CommandError`) are logged and recovered from; listening carries on.

use crate::action::ActionKind;
use std::time::Duration;

/// Failures of a single call to the structured extraction service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extraction service error: {0}")]
    Service(String),
    #[error("extraction returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("extracted field `{field}` out of bounds: {detail}")]
    OutOfBounds { field: &'static str, detail: String },
}

/// Failures that abort a listening session and return it to idle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio setup failed: {0}")]
    AudioSetupFailure(String),
    #[error("transcriber setup failed: {0}")]
    TranscriberSetupFailure(String),
}

/// Failures of a single spoken command. None of these mutate the scene.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("could not classify command: {0}")]
    ClassificationFailure(ExtractionError),
    #[error("could not extract {kind} parameters: {source}")]
    ExtractionFailure {
        kind: ActionKind,
        #[source]
        source: ExtractionError,
    },
    #[error("no active entity to apply {0} to")]
    NoActiveEntity(ActionKind),
    #[error("unrecognized action kind `{0}`")]
    UnrecognizedActionKind(String),
    #[error("scene runtime is no longer running")]
    SceneUnavailable,
}

impl CommandError {
    /// Whether further speech may complete the command, so the accumulated
    /// transcript should be kept rather than cleared.
    pub fn keeps_transcript(&self) -> bool {
        matches!(
            self,
            CommandError::ClassificationFailure(_)
                | CommandError::ExtractionFailure { .. }
                | CommandError::SceneUnavailable
        )
    }
}
