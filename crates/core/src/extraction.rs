//! Structured Extraction Service
//!
//! The interpreter turns free text into typed records by asking a language model
//! for a JSON document that conforms to a schema. This module defines that
//! contract, a typed helper that validates what comes back, and an
//! implementation for any OpenAI-compatible chat API.

use crate::error::ExtractionError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Sampling options passed along with every extraction call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// Upper bound on a single call; exceeding it is an `ExtractionError::Timeout`.
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.15,
            timeout: Duration::from_secs(10),
        }
    }
}

/// One request to the extraction service.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    /// The user's utterance.
    pub prompt: String,
    /// Task-specific instructions for the model.
    pub instructions: String,
    /// Name of the target record, used as the schema name.
    pub schema_name: String,
    /// JSON schema the response must conform to.
    pub schema: serde_json::Value,
    pub temperature: f32,
}

/// A service that converts free text into a schema-conformant JSON document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn respond(&self, request: ExtractionRequest)
    -> Result<serde_json::Value, ExtractionError>;
}

/// Hard validation bounds a record must satisfy once deserialized.
pub trait Bounded {
    fn check(&self) -> Result<(), ExtractionError>;
}

/// Checks that `value` lies in `[min, max]`.
pub(crate) fn within(
    field: &'static str,
    value: f32,
    min: f32,
    max: f32,
) -> Result<(), ExtractionError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ExtractionError::OutOfBounds {
            field,
            detail: format!("{value} not in [{min}, {max}]"),
        })
    }
}

/// Asks `service` for a `T`, bounded by `options.timeout`.
///
/// The schema is derived from `T`, the response is deserialized into `T`, and
/// `T`'s bounds are enforced before it is handed back.
pub async fn respond_as<T>(
    service: &dyn StructuredExtractor,
    prompt: &str,
    instructions: &str,
    options: GenerationOptions,
) -> Result<T, ExtractionError>
where
    T: JsonSchema + DeserializeOwned + Bounded,
{
    let schema = serde_json::to_value(schemars::schema_for!(T))
        .map_err(|e| ExtractionError::InvalidResponse(format!("schema generation: {e}")))?;
    let request = ExtractionRequest {
        prompt: prompt.to_string(),
        instructions: instructions.to_string(),
        schema_name: T::schema_name().into_owned(),
        schema,
        temperature: options.temperature,
    };

    let value = tokio::time::timeout(options.timeout, service.respond(request))
        .await
        .map_err(|_| ExtractionError::Timeout(options.timeout))??;
    debug!(response = %value, "Extraction response received");

    let record: T = serde_json::from_value(value)
        .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
    record.check()?;
    Ok(record)
}

/// An implementation of `StructuredExtractor` for any OpenAI-compatible API.
pub struct OpenAIExtractor {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIExtractor {
    /// Creates a new extractor.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The chat model used for extraction (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl StructuredExtractor for OpenAIExtractor {
    async fn respond(
        &self,
        request: ExtractionRequest,
    ) -> Result<serde_json::Value, ExtractionError> {
        let service_err = |e: async_openai::error::OpenAIError| ExtractionError::Service(e.to_string());

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(request.temperature)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.instructions)
                    .build()
                    .map_err(service_err)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.prompt)
                    .build()
                    .map_err(service_err)?
                    .into(),
            ])
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: request.schema_name,
                    schema: Some(request.schema),
                    strict: None,
                },
            })
            .build()
            .map_err(service_err)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(service_err)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| ExtractionError::InvalidResponse("no content in response".into()))?;

        serde_json::from_str(content).map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
    }
}
