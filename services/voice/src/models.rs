//! Request and response bodies for the REST API.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
}

/// A command typed instead of spoken.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SubmitCommandPayload {
    pub text: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct UpdateListeningPayload {
    /// Starts or stops the microphone session. Omitted leaves it as is.
    pub enabled: Option<bool>,
    /// Turns the volatile fast path on or off. Omitted leaves it as is.
    pub volatile_processing: Option<bool>,
}
