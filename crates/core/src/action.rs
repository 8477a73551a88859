//! Command Classifier
//!
//! Maps a raw utterance to exactly one `ActionKind`. The priority rules are
//! encoded in the instructions sent to the extraction service; the first rule
//! (system words) is also decided locally so it holds regardless of the model.

use crate::{
    error::{CommandError, ExtractionError},
    extraction::{Bounded, GenerationOptions, StructuredExtractor, respond_as},
    utterance,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, instrument};

/// The closed set of command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Creation,
    Movement,
    Rotation,
    Scaling,
    Modification,
    System,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Creation,
        ActionKind::Movement,
        ActionKind::Rotation,
        ActionKind::Scaling,
        ActionKind::Modification,
        ActionKind::System,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Creation => "creation",
            ActionKind::Movement => "movement",
            ActionKind::Rotation => "rotation",
            ActionKind::Scaling => "scaling",
            ActionKind::Modification => "modification",
            ActionKind::System => "system",
        }
    }

    /// Whether the kind mutates the active entity and therefore needs one.
    pub fn needs_active_entity(self) -> bool {
        matches!(
            self,
            ActionKind::Movement | ActionKind::Scaling | ActionKind::Modification
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| CommandError::UnrecognizedActionKind(s.to_string()))
    }
}

/// Words that make an utterance a system command, whatever else it says.
pub const SYSTEM_WORDS: [&str; 7] = ["start", "stop", "play", "begin", "pause", "enable", "disable"];

pub const ACTION_INSTRUCTIONS: &str = "\
Identify whether the input text is a creation action, movement action, rotation action, scaling action, modification action, or system action.
IF the input contains START/STOP/PLAY/BEGIN/PAUSE/ENABLE/DISABLE, assume it is a system action.
IF the input contains RIGHT/LEFT/FORWARD/BACKWARD OR MOVE/LIFT/SLIDE/TRANSLATE, assume it is a movement action.
IF the input contains BIG/SMALL/BIGGER/SMALLER/SCALE, assume it is a scaling action.
IF there is NO action, assume it is creation action, EVEN IF input contains SIZE.
IF the input is similar to MAKE (IT/THE object) (COLOR/SHINY/METALLIC/ROUGHNESS), assume it is a modification.
IF the input is similar to MAKE (IT/THE object) ((X TIMES)? BIGGER/SMALLER), assume it is a scaling action.
IF the input contains MORE, assume it is a creation action.
ELSE, IF the action word is MAKE, assume it is a creation action.";

/// What kind of action the model found in the utterance.
///
/// Kept as a string so that an answer outside the taxonomy surfaces as
/// `UnrecognizedActionKind` instead of a parse failure.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ActionType {
    #[schemars(
        description = "What type of action is in the input text.",
        extend("enum" = ["creation", "movement", "rotation", "scaling", "modification", "system"])
    )]
    pub action_type: String,
}

impl Bounded for ActionType {
    fn check(&self) -> Result<(), ExtractionError> {
        if self.action_type.trim().is_empty() {
            return Err(ExtractionError::InvalidResponse("empty action_type".into()));
        }
        Ok(())
    }
}

/// Classifies utterances through the structured extraction service.
#[derive(Clone)]
pub struct CommandClassifier {
    service: Arc<dyn StructuredExtractor>,
    options: GenerationOptions,
}

impl CommandClassifier {
    pub fn new(service: Arc<dyn StructuredExtractor>, options: GenerationOptions) -> Self {
        Self { service, options }
    }

    /// Returns the kind of `utterance`.
    ///
    /// Fails with `ClassificationFailure` when the service cannot answer and
    /// with `UnrecognizedActionKind` when it answers outside the taxonomy.
    #[instrument(name = "classify", skip(self))]
    pub async fn classify(&self, utterance: &str) -> Result<ActionKind, CommandError> {
        if utterance::has_any_word(utterance, &SYSTEM_WORDS) {
            debug!("System word present, skipping model classification");
            return Ok(ActionKind::System);
        }

        let answer: ActionType =
            respond_as(self.service.as_ref(), utterance, ACTION_INSTRUCTIONS, self.options)
                .await
                .map_err(CommandError::ClassificationFailure)?;
        let kind = answer.action_type.parse::<ActionKind>()?;
        debug!(%kind, "Utterance classified");
        Ok(kind)
    }

    /// Issues one throwaway classification so the first real command does not
    /// pay for a cold model.
    pub async fn warmup(&self) -> Result<(), CommandError> {
        let answer: ActionType = respond_as(
            self.service.as_ref(),
            "Make a red cube",
            ACTION_INSTRUCTIONS,
            self.options,
        )
        .await
        .map_err(CommandError::ClassificationFailure)?;
        debug!(kind = %answer.action_type, "Classifier warmed up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MockStructuredExtractor;
    use serde_json::json;

    fn classifier_answering(kind: &'static str) -> CommandClassifier {
        let mut mock = MockStructuredExtractor::new();
        mock.expect_respond()
            .withf(|req| req.instructions == ACTION_INSTRUCTIONS)
            .returning(move |_| Ok(json!({ "action_type": kind })));
        CommandClassifier::new(Arc::new(mock), GenerationOptions::default())
    }

    #[tokio::test]
    async fn test_system_words_dominate() {
        // The model would say movement; the system rule wins without asking it.
        let mut mock = MockStructuredExtractor::new();
        mock.expect_respond().times(0);
        let classifier = CommandClassifier::new(Arc::new(mock), GenerationOptions::default());

        for utterance in [
            "start the system",
            "Stop physics and move it left",
            "play",
            "begin making a big red cube",
            "pause the physics",
            "enable gravity",
            "disable the system",
        ] {
            assert_eq!(classifier.classify(utterance).await.unwrap(), ActionKind::System);
        }
    }

    #[tokio::test]
    async fn test_model_answer_is_used() {
        let classifier = classifier_answering("scaling");
        assert_eq!(
            classifier.classify("make it bigger").await.unwrap(),
            ActionKind::Scaling
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_is_unrecognized() {
        let classifier = classifier_answering("teleport");
        let err = classifier.classify("beam me up").await.unwrap_err();
        assert_eq!(err, CommandError::UnrecognizedActionKind("teleport".into()));
    }

    #[tokio::test]
    async fn test_service_failure_is_classification_failure() {
        let mut mock = MockStructuredExtractor::new();
        mock.expect_respond()
            .returning(|_| Err(ExtractionError::Service("offline".into())));
        let classifier = CommandClassifier::new(Arc::new(mock), GenerationOptions::default());

        let err = classifier.classify("a red cube").await.unwrap_err();
        assert!(matches!(err, CommandError::ClassificationFailure(_)));
    }

    #[test]
    fn test_action_kind_parsing() {
        assert_eq!("Creation".parse::<ActionKind>().unwrap(), ActionKind::Creation);
        assert_eq!(" system ".parse::<ActionKind>().unwrap(), ActionKind::System);
        assert!("rotate".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_action_type_schema_lists_taxonomy() {
        let schema = serde_json::to_value(schemars::schema_for!(ActionType)).unwrap();
        let allowed = &schema["properties"]["action_type"]["enum"];
        assert_eq!(allowed.as_array().map(Vec::len), Some(6));
    }
}
