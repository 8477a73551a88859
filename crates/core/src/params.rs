//! Parameter Extractors
//!
//! One typed record per action kind, each produced by the structured extraction
//! service with kind-specific instructions and hard bounds. After the model
//! answers, the fixed word tables and scaling laws are applied so that they hold
//! even when the model drifts.

use crate::{
    action::{ActionKind, SYSTEM_WORDS},
    entity::{Color, Material, Shape},
    error::{CommandError, ExtractionError},
    extraction::{Bounded, GenerationOptions, StructuredExtractor, respond_as, within},
    utterance,
};
use glam::Vec3;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, instrument};

pub const CREATE_INSTRUCTIONS: &str = "Identify the type of object, its size, its color, how rough it should be, and whether that color is metallic or not. Orb and ball are sphere, cube is box. IF the input contains MORE, entity count is 3. OTHERWISE, entity count is 1.";

pub const MODIFY_INSTRUCTIONS: &str =
    "From the input text, identify the color, the roughness, and whether that color is metallic or not.";

pub const SCALE_INSTRUCTIONS: &str = "Identify the number to scale the object by. IF the input is similar to SCALE DOWN or MAKE SMALLER, AND there is a numerical value greater than 1, divide 1 by the numerical value to get the correct scale factor. IF no number is specified, BIGGER is 2, SMALLER is 0.5";

pub const MOVE_INSTRUCTIONS: &str = "\
Identify which axis the movement is in, whether it's a positive direction, and how far the distance to move is, in meters.
The x-axis is right-left, the y-axis is up-down, and the z-axis is front-back, with directions being positive-negative.
Forward is z-axis and positive.
Toward me is z-axis and positive.
Back is z-axis and negative.
Backward is z-axis and negative.
Away is z-axis and negative.
Right is x-axis and positive.
Left is x-axis and negative.
Up is y-axis and positive.
Down is y-axis and negative.
The following are ALWAYS positive: RIGHT, FORWARD, TOWARD ME, and UP.
The following are ALWAYS negative: LEFT, BACK, BACKWARD, AWAY, and DOWN.
IF no distance is specified the DEFAULT is 0.5.";

pub const SYSTEM_INSTRUCTIONS: &str = "Determine what the action word in the input is.";

/// Default translation when the utterance names no distance, in meters.
pub const DEFAULT_MOVE_DISTANCE: f32 = 0.5;

// --- Creation ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreationParams {
    #[schemars(description = "Type of object in the input text. Cube is ALWAYS box. Orb and Ball are sphere")]
    pub shape: Shape,
    #[schemars(
        description = "The size/radius of the object in the input text",
        range(min = 0.1, max = 0.15)
    )]
    pub size: f32,
    #[schemars(description = "System standard color in the input text")]
    pub color: Color,
    #[schemars(description = "Whether the color is metallic or not")]
    pub metallic: bool,
    #[schemars(
        description = "What roughness the object is. Metallic, shiny are closer to 0, matte is closer to 1.",
        range(min = 0.0, max = 1.0)
    )]
    pub roughness: f32,
    #[schemars(
        description = "The number of objects to make. MORE means minimum 2 objects, unspecified or default is 1.",
        range(min = 1, max = 5)
    )]
    pub count: u8,
}

impl CreationParams {
    pub fn material(&self) -> Material {
        Material {
            color: self.color,
            metallic: self.metallic,
            roughness: self.roughness,
        }
    }

    fn reconcile(mut self, utterance: &str) -> Self {
        if utterance::has_any_word(utterance, &["more"]) && self.count < 2 {
            self.count = 3;
        }
        self
    }
}

impl Bounded for CreationParams {
    fn check(&self) -> Result<(), ExtractionError> {
        within("size", self.size, 0.1, 0.15)?;
        within("roughness", self.roughness, 0.0, 1.0)?;
        within("count", f32::from(self.count), 1.0, 5.0)
    }
}

// --- Movement ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(self) -> f32 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }
}

/// The fixed direction table. Multi-word phrases come first.
const DIRECTIONS: [(&str, Axis, Sign); 12] = [
    ("toward me", Axis::Z, Sign::Positive),
    ("towards me", Axis::Z, Sign::Positive),
    ("right", Axis::X, Sign::Positive),
    ("left", Axis::X, Sign::Negative),
    ("up", Axis::Y, Sign::Positive),
    ("down", Axis::Y, Sign::Negative),
    ("forward", Axis::Z, Sign::Positive),
    ("front", Axis::Z, Sign::Positive),
    ("back", Axis::Z, Sign::Negative),
    ("backward", Axis::Z, Sign::Negative),
    ("backwards", Axis::Z, Sign::Negative),
    ("away", Axis::Z, Sign::Negative),
];

/// Looks up a direction word or phrase in the fixed table.
pub fn direction_of(word: &str) -> Option<(Axis, Sign)> {
    let key = utterance::normalized(word);
    DIRECTIONS
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|&(_, axis, sign)| (axis, sign))
}

/// The first direction named in `text`, if any.
pub fn direction_in(text: &str) -> Option<(Axis, Sign)> {
    let tokens = utterance::words(text);
    (0..tokens.len()).find_map(|i| {
        if let Some(next) = tokens.get(i + 1) {
            if let Some(found) = direction_of(&format!("{} {}", tokens[i], next)) {
                return Some(found);
            }
        }
        direction_of(&tokens[i])
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MoveParams {
    #[schemars(description = "Which axis the movement is on. Right/left is x, up/down is y, forward/backward is z.")]
    pub axis: Axis,
    #[schemars(description = "Whether the movement is positive or not. Right, front, forward, and up are positive. Left, backward, and down are negative.")]
    pub direction: Sign,
    #[schemars(
        description = "The amount to translate, in meters. If unspecified default to 0.5",
        range(min = 0.0, max = 2.0)
    )]
    #[serde(default = "default_distance")]
    pub distance: f32,
}

fn default_distance() -> f32 {
    DEFAULT_MOVE_DISTANCE
}

impl MoveParams {
    /// Signed offset along the axis, in the entity's own frame.
    pub fn offset(&self) -> Vec3 {
        self.axis.unit() * self.direction.factor() * self.distance
    }

    fn reconcile(mut self, utterance: &str) -> Self {
        if let Some((axis, sign)) = direction_in(utterance) {
            self.axis = axis;
            self.direction = sign;
        }
        self
    }
}

impl Bounded for MoveParams {
    fn check(&self) -> Result<(), ExtractionError> {
        within("distance", self.distance, 0.0, 2.0)
    }
}

// --- Scaling ---

const SHRINK_WORDS: [&str; 5] = ["smaller", "small", "shrink", "tinier", "less"];
const GROW_WORDS: [&str; 6] = ["bigger", "big", "larger", "large", "grow", "enlarge"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScaleParams {
    #[schemars(
        description = "The amount to scale the object by. IF action includes SMALLER or SCALE DOWN or SHRINK and the number is larger than 1, divide 1 by the number to get the scale. If not specified, bigger is 2, smaller is 0.5",
        range(min = 0.1, max = 10.0)
    )]
    pub factor: f32,
}

impl ScaleParams {
    fn reconcile(self, utterance: &str) -> Self {
        let shrink = utterance::has_any_word(utterance, &SHRINK_WORDS)
            || utterance::has_phrase(utterance, "scale down");
        let grow = utterance::has_any_word(utterance, &GROW_WORDS)
            || utterance::has_phrase(utterance, "scale up");
        let number = utterance::first_number(utterance);

        let factor = match (shrink, grow, number) {
            (true, _, Some(n)) if n > 1.0 => 1.0 / n,
            (true, _, None) if self.factor >= 1.0 => 0.5,
            (true, _, _) if self.factor > 1.0 => 1.0 / self.factor,
            (false, true, None) if self.factor <= 1.0 => 2.0,
            _ => self.factor,
        };
        Self {
            factor: factor.clamp(0.1, 10.0),
        }
    }
}

impl Bounded for ScaleParams {
    fn check(&self) -> Result<(), ExtractionError> {
        within("factor", self.factor, 0.1, 10.0)
    }
}

// --- Modification ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModifyParams {
    #[schemars(description = "What color the modification in the input is")]
    pub color: Color,
    #[schemars(
        description = "What roughness the modification is. Metallic, shiny are closer to 0, matte is closer to 1.",
        range(min = 0.0, max = 1.0)
    )]
    pub roughness: f32,
    #[schemars(description = "Whether the modification is metallic or not")]
    pub metallic: bool,
}

impl ModifyParams {
    pub fn material(&self) -> Material {
        Material {
            color: self.color,
            metallic: self.metallic,
            roughness: self.roughness,
        }
    }
}

impl Bounded for ModifyParams {
    fn check(&self) -> Result<(), ExtractionError> {
        within("roughness", self.roughness, 0.0, 1.0)
    }
}

// --- System ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SystemWord {
    Start,
    Stop,
    Play,
    Pause,
    Begin,
    Enable,
    Disable,
}

impl SystemWord {
    /// Whether the word switches the simulation on.
    pub fn is_on(self) -> bool {
        matches!(
            self,
            SystemWord::Start | SystemWord::Play | SystemWord::Enable | SystemWord::Begin
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SystemParams {
    #[schemars(description = "The action word in the input text")]
    pub action_word: SystemWord,
}

impl SystemParams {
    pub fn is_on(&self) -> bool {
        self.action_word.is_on()
    }

    fn reconcile(self, utterance: &str) -> Self {
        let spoken = utterance::words(utterance)
            .into_iter()
            .filter(|w| SYSTEM_WORDS.contains(&w.as_str()))
            .find_map(|w| serde_json::from_value::<SystemWord>(serde_json::Value::String(w)).ok());
        Self {
            action_word: spoken.unwrap_or(self.action_word),
        }
    }
}

impl Bounded for SystemParams {
    fn check(&self) -> Result<(), ExtractionError> {
        Ok(())
    }
}

// --- Extractor ---

/// Typed parameters for one classified command.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionParams {
    Creation(CreationParams),
    Movement(MoveParams),
    Scaling(ScaleParams),
    Modification(ModifyParams),
    System(SystemParams),
}

/// Extracts the parameter record for a classified utterance.
#[derive(Clone)]
pub struct ParameterExtractor {
    service: Arc<dyn StructuredExtractor>,
    options: GenerationOptions,
}

impl ParameterExtractor {
    pub fn new(service: Arc<dyn StructuredExtractor>, options: GenerationOptions) -> Self {
        Self { service, options }
    }

    /// Extracts the parameters for `kind`.
    ///
    /// Rotation has no parameter record and is reported as unrecognized.
    #[instrument(name = "extract", skip(self))]
    pub async fn extract(
        &self,
        utterance: &str,
        kind: ActionKind,
    ) -> Result<ActionParams, CommandError> {
        let failure = |source| CommandError::ExtractionFailure { kind, source };
        let params = match kind {
            ActionKind::Creation => ActionParams::Creation(self.creation(utterance).await.map_err(failure)?),
            ActionKind::Movement => ActionParams::Movement(self.movement(utterance).await.map_err(failure)?),
            ActionKind::Scaling => ActionParams::Scaling(self.scaling(utterance).await.map_err(failure)?),
            ActionKind::Modification => {
                ActionParams::Modification(self.modification(utterance).await.map_err(failure)?)
            }
            ActionKind::System => ActionParams::System(self.system(utterance).await.map_err(failure)?),
            ActionKind::Rotation => {
                return Err(CommandError::UnrecognizedActionKind(kind.to_string()));
            }
        };
        debug!(?params, "Parameters extracted");
        Ok(params)
    }

    pub async fn creation(&self, utterance: &str) -> Result<CreationParams, ExtractionError> {
        let params: CreationParams = self.ask(utterance, CREATE_INSTRUCTIONS).await?;
        Ok(params.reconcile(utterance))
    }

    pub async fn movement(&self, utterance: &str) -> Result<MoveParams, ExtractionError> {
        let params: MoveParams = self.ask(utterance, MOVE_INSTRUCTIONS).await?;
        Ok(params.reconcile(utterance))
    }

    pub async fn scaling(&self, utterance: &str) -> Result<ScaleParams, ExtractionError> {
        let params: ScaleParams = self.ask(utterance, SCALE_INSTRUCTIONS).await?;
        Ok(params.reconcile(utterance))
    }

    pub async fn modification(&self, utterance: &str) -> Result<ModifyParams, ExtractionError> {
        self.ask(utterance, MODIFY_INSTRUCTIONS).await
    }

    pub async fn system(&self, utterance: &str) -> Result<SystemParams, ExtractionError> {
        let params: SystemParams = self.ask(utterance, SYSTEM_INSTRUCTIONS).await?;
        Ok(params.reconcile(utterance))
    }

    async fn ask<T>(&self, utterance: &str, instructions: &str) -> Result<T, ExtractionError>
    where
        T: JsonSchema + serde::de::DeserializeOwned + Bounded,
    {
        respond_as(self.service.as_ref(), utterance, instructions, self.options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MockStructuredExtractor;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn extractor_answering(instructions: &'static str, answer: serde_json::Value) -> ParameterExtractor {
        let mut mock = MockStructuredExtractor::new();
        mock.expect_respond()
            .withf(move |req| req.instructions == instructions)
            .returning(move |_| Ok(answer.clone()));
        ParameterExtractor::new(Arc::new(mock), GenerationOptions::default())
    }

    #[test]
    fn test_direction_table_is_total_and_fixed() {
        let expected = [
            ("right", Axis::X, Sign::Positive),
            ("left", Axis::X, Sign::Negative),
            ("up", Axis::Y, Sign::Positive),
            ("down", Axis::Y, Sign::Negative),
            ("forward", Axis::Z, Sign::Positive),
            ("backward", Axis::Z, Sign::Negative),
            ("back", Axis::Z, Sign::Negative),
            ("away", Axis::Z, Sign::Negative),
            ("toward me", Axis::Z, Sign::Positive),
        ];
        for (word, axis, sign) in expected {
            assert_eq!(direction_of(word), Some((axis, sign)), "word: {word}");
        }
        assert_eq!(direction_of("sideways"), None);
    }

    #[test]
    fn test_direction_in_prefers_phrases() {
        assert_eq!(direction_in("bring it toward me"), Some((Axis::Z, Sign::Positive)));
        assert_eq!(direction_in("slide the cube left a bit"), Some((Axis::X, Sign::Negative)));
        assert_eq!(direction_in("move it"), None);
    }

    #[tokio::test]
    async fn test_creation_red_cube() {
        let extractor = extractor_answering(
            CREATE_INSTRUCTIONS,
            json!({ "shape": "cube", "size": 0.1, "color": "red", "metallic": false, "roughness": 0.5, "count": 1 }),
        );
        let params = extractor.creation("make a red cube").await.unwrap();
        assert_eq!(params.shape, Shape::Box);
        assert_eq!(params.color, Color::Red);
        assert_eq!(params.count, 1);
    }

    #[tokio::test]
    async fn test_creation_more_means_several() {
        // The model forgot the MORE rule; the count is corrected.
        let extractor = extractor_answering(
            CREATE_INSTRUCTIONS,
            json!({ "shape": "sphere", "size": 0.12, "color": "blue", "metallic": true, "roughness": 0.1, "count": 1 }),
        );
        let params = extractor.creation("make 3 more blue spheres").await.unwrap();
        assert_eq!(params.shape, Shape::Sphere);
        assert_eq!(params.color, Color::Blue);
        assert!(params.count >= 2);
    }

    #[tokio::test]
    async fn test_creation_size_out_of_bounds_fails() {
        let extractor = extractor_answering(
            CREATE_INSTRUCTIONS,
            json!({ "shape": "box", "size": 2.0, "color": "red", "metallic": false, "roughness": 0.5, "count": 1 }),
        );
        let err = extractor.extract("make a huge cube", ActionKind::Creation).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::ExtractionFailure { kind: ActionKind::Creation, source: ExtractionError::OutOfBounds { field: "size", .. } }
        ));
    }

    #[tokio::test]
    async fn test_scaling_inverse_law() {
        let extractor = extractor_answering(SCALE_INSTRUCTIONS, json!({ "factor": 4.0 }));
        let params = extractor.scaling("make it smaller by 4").await.unwrap();
        assert_abs_diff_eq!(params.factor, 0.25);
    }

    #[tokio::test]
    async fn test_scaling_defaults() {
        let extractor = extractor_answering(SCALE_INSTRUCTIONS, json!({ "factor": 2.0 }));
        assert_abs_diff_eq!(extractor.scaling("make it bigger").await.unwrap().factor, 2.0);

        let extractor = extractor_answering(SCALE_INSTRUCTIONS, json!({ "factor": 1.0 }));
        assert_abs_diff_eq!(extractor.scaling("make it bigger").await.unwrap().factor, 2.0);
        assert_abs_diff_eq!(extractor.scaling("make it smaller").await.unwrap().factor, 0.5);
    }

    #[tokio::test]
    async fn test_scaling_keeps_explicit_growth() {
        let extractor = extractor_answering(SCALE_INSTRUCTIONS, json!({ "factor": 3.0 }));
        assert_abs_diff_eq!(
            extractor.scaling("make it 3 times bigger").await.unwrap().factor,
            3.0
        );
    }

    #[tokio::test]
    async fn test_movement_table_overrides_model() {
        let extractor = extractor_answering(
            MOVE_INSTRUCTIONS,
            json!({ "axis": "z", "direction": "positive", "distance": 1.0 }),
        );
        let params = extractor.movement("move it left one meter").await.unwrap();
        assert_eq!(params.axis, Axis::X);
        assert_eq!(params.direction, Sign::Negative);
        assert_abs_diff_eq!(params.distance, 1.0);
        assert_eq!(params.offset(), Vec3::new(-1.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn test_movement_default_distance() {
        let extractor = extractor_answering(
            MOVE_INSTRUCTIONS,
            json!({ "axis": "x", "direction": "positive" }),
        );
        let params = extractor.movement("move it right").await.unwrap();
        assert_abs_diff_eq!(params.distance, DEFAULT_MOVE_DISTANCE);
    }

    #[tokio::test]
    async fn test_system_on_off() {
        let extractor = extractor_answering(SYSTEM_INSTRUCTIONS, json!({ "action_word": "start" }));
        assert!(extractor.system("start physics").await.unwrap().is_on());
        // The spoken word wins over a mismatched model answer.
        assert!(!extractor.system("pause the physics").await.unwrap().is_on());

        for word in [SystemWord::Stop, SystemWord::Pause, SystemWord::Disable] {
            assert!(!word.is_on());
        }
    }

    #[tokio::test]
    async fn test_rotation_is_unrecognized() {
        let mut mock = MockStructuredExtractor::new();
        mock.expect_respond().times(0);
        let extractor = ParameterExtractor::new(Arc::new(mock), GenerationOptions::default());
        let err = extractor.extract("rotate it", ActionKind::Rotation).await.unwrap_err();
        assert_eq!(err, CommandError::UnrecognizedActionKind("rotation".into()));
    }

    #[tokio::test]
    async fn test_modification_failure_carries_kind() {
        let mut mock = MockStructuredExtractor::new();
        mock.expect_respond()
            .returning(|_| Err(ExtractionError::Service("busy".into())));
        let extractor = ParameterExtractor::new(Arc::new(mock), GenerationOptions::default());
        let err = extractor.extract("make it blue", ActionKind::Modification).await.unwrap_err();
        assert!(matches!(err, CommandError::ExtractionFailure { kind: ActionKind::Modification, .. }));
    }
}
