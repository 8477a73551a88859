//! Command Dispatcher
//!
//! Owns the entity collection, the active-entity reference and the simulation
//! switch. A committed utterance is classified, its parameters are extracted,
//! and the matching mutation is applied. Every command, whatever its outcome,
//! leaves exactly one entry in the command log.

use crate::{
    EntityChange, SceneEvent,
    action::{ActionKind, CommandClassifier},
    attraction::{AttractionParams, Body, EntityForce, attraction_forces},
    entity::{Entity, EntityDescriptor, EntityId},
    error::CommandError,
    extraction::{GenerationOptions, StructuredExtractor},
    history::{CommandLog, CommandLogEntry},
    params::{
        ActionParams, CreationParams, ModifyParams, MoveParams, ParameterExtractor, ScaleParams,
        SystemParams,
    },
};
use chrono::{DateTime, Utc};
use glam::Vec3;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Placement and simulation settings for a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    /// Fixed point new entities spawn around; also the attraction center.
    pub anchor: Vec3,
    /// Lower corner of the spawn offset box, relative to the anchor.
    pub spawn_min: Vec3,
    /// Upper corner of the spawn offset box, relative to the anchor.
    pub spawn_max: Vec3,
    /// Seed for spawn offsets. `None` draws from the OS.
    pub seed: Option<u64>,
    pub attraction: AttractionParams,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            anchor: Vec3::new(0.0, 1.0, -1.5),
            spawn_min: Vec3::new(-0.5, -0.5, -0.5),
            spawn_max: Vec3::new(0.5, 0.5, 0.3),
            seed: None,
            attraction: AttractionParams::default(),
        }
    }
}

/// A committed utterance, stamped with its position in the command stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub sequence: u64,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// What a successful command did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub command: Command,
    pub kind: ActionKind,
    pub summary: String,
    /// Changes for the renderer to apply, in order.
    pub events: Vec<SceneEvent>,
}

/// Everything a newly attached renderer needs to rebuild the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub entities: Vec<EntityDescriptor>,
    pub active: Option<EntityId>,
    pub simulation_enabled: bool,
}

/// A classified command with its extracted parameters, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub kind: ActionKind,
    pub params: ActionParams,
}

/// The model-backed half of dispatching. It holds no scene state, so it can
/// run outside whatever owns the scene.
#[derive(Clone)]
pub struct CommandInterpreter {
    classifier: CommandClassifier,
    extractor: ParameterExtractor,
}

impl CommandInterpreter {
    pub fn new(service: Arc<dyn StructuredExtractor>, options: GenerationOptions) -> Self {
        Self {
            classifier: CommandClassifier::new(service.clone(), options),
            extractor: ParameterExtractor::new(service, options),
        }
    }

    pub fn classifier(&self) -> &CommandClassifier {
        &self.classifier
    }

    /// Classifies `text` and extracts its parameters.
    ///
    /// A mutation is rejected before extraction when `has_active_entity` is
    /// false.
    pub async fn interpret(
        &self,
        text: &str,
        has_active_entity: bool,
    ) -> Result<Interpretation, CommandError> {
        if text.is_empty() {
            return Err(CommandError::UnrecognizedActionKind(String::new()));
        }

        let kind = self.classifier.classify(text).await?;
        if kind.needs_active_entity() && !has_active_entity {
            return Err(CommandError::NoActiveEntity(kind));
        }
        let params = self.extractor.extract(text, kind).await?;
        Ok(Interpretation { kind, params })
    }
}

pub struct CommandDispatcher {
    interpreter: CommandInterpreter,
    config: SceneConfig,
    entities: Vec<Entity>,
    active: Option<EntityId>,
    simulation_enabled: bool,
    log: CommandLog,
    rng: StdRng,
    next_sequence: u64,
}

impl CommandDispatcher {
    /// Creates a dispatcher with an empty scene, using `service` for both
    /// classification and parameter extraction.
    pub fn new(
        service: Arc<dyn StructuredExtractor>,
        options: GenerationOptions,
        config: SceneConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            interpreter: CommandInterpreter::new(service, options),
            config,
            entities: Vec::new(),
            active: None,
            simulation_enabled: false,
            log: CommandLog::new(),
            rng,
            next_sequence: 0,
        }
    }

    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn active_entity(&self) -> Option<&Entity> {
        self.active
            .and_then(|id| self.entities.iter().find(|e| e.id == id))
    }

    pub fn simulation_enabled(&self) -> bool {
        self.simulation_enabled
    }

    pub fn history(&self) -> &CommandLog {
        &self.log
    }

    pub fn clear_history(&mut self) {
        self.log.clear();
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            entities: self.entities.iter().map(Entity::descriptor).collect(),
            active: self.active,
            simulation_enabled: self.simulation_enabled,
        }
    }

    /// Interprets and applies one committed utterance.
    #[instrument(skip(self))]
    pub async fn dispatch(&mut self, text: &str) -> Result<DispatchOutcome, CommandError> {
        let command = self.begin(text);
        let interpreted = self
            .interpreter
            .interpret(&command.text, self.active.is_some())
            .await;
        self.conclude(command, interpreted)
    }

    /// Stamps `text` with the next sequence number.
    pub fn begin(&mut self, text: &str) -> Command {
        let command = Command {
            sequence: self.next_sequence,
            text: text.trim().to_string(),
            received_at: Utc::now(),
        };
        self.next_sequence += 1;
        command
    }

    pub fn has_active_entity(&self) -> bool {
        self.active.is_some()
    }

    /// Applies an interpreted command and logs it, whether it was interpreted
    /// successfully or not.
    pub fn conclude(
        &mut self,
        command: Command,
        interpreted: Result<Interpretation, CommandError>,
    ) -> Result<DispatchOutcome, CommandError> {
        let result = interpreted.and_then(|interpretation| self.apply(interpretation));
        let entry = match &result {
            Ok((kind, summary, _)) => {
                info!(sequence = command.sequence, %kind, %summary, "Command applied");
                CommandLogEntry {
                    kind: Some(*kind),
                    text: command.text.clone(),
                    result: summary.clone(),
                    success: true,
                    timestamp: command.received_at,
                }
            }
            Err(e) => {
                warn!(sequence = command.sequence, error = %e, "Command failed");
                CommandLogEntry {
                    kind: failed_kind(e),
                    text: command.text.clone(),
                    result: e.to_string(),
                    success: false,
                    timestamp: command.received_at,
                }
            }
        };
        self.log.record(entry);

        let (kind, summary, events) = result?;
        Ok(DispatchOutcome {
            command,
            kind,
            summary,
            events,
        })
    }

    /// Feeds renderer-integrated positions back into the scene and returns the
    /// attraction force on every enrolled entity.
    pub fn tick(&mut self, reported: &[Body]) -> Vec<EntityForce> {
        for body in reported {
            if let Some(entity) = self.entities.iter_mut().find(|e| e.id == body.id) {
                entity.position = body.position;
            }
        }
        if !self.simulation_enabled {
            return Vec::new();
        }

        let bodies: Vec<Body> = self
            .entities
            .iter()
            .filter(|e| e.simulated)
            .map(|e| Body {
                id: e.id,
                position: e.position,
            })
            .collect();
        attraction_forces(self.config.anchor, &bodies, &self.config.attraction)
    }

    fn apply(
        &mut self,
        Interpretation { kind, params }: Interpretation,
    ) -> Result<(ActionKind, String, Vec<SceneEvent>), CommandError> {
        let (summary, events) = match params {
            ActionParams::Creation(params) => self.create(&params),
            ActionParams::Movement(params) => self.translate(kind, params)?,
            ActionParams::Scaling(params) => self.rescale(kind, params)?,
            ActionParams::Modification(params) => self.restyle(kind, params)?,
            ActionParams::System(params) => self.switch_simulation(params),
        };
        Ok((kind, summary, events))
    }

    fn create(&mut self, params: &CreationParams) -> (String, Vec<SceneEvent>) {
        let mut events = Vec::with_capacity(usize::from(params.count));
        for _ in 0..params.count {
            let offset = Vec3::new(
                self.rng.random_range(self.config.spawn_min.x..=self.config.spawn_max.x),
                self.rng.random_range(self.config.spawn_min.y..=self.config.spawn_max.y),
                self.rng.random_range(self.config.spawn_min.z..=self.config.spawn_max.z),
            );
            let mut entity = Entity::new(
                params.shape,
                params.size,
                params.material(),
                self.config.anchor + offset,
            );
            entity.simulated = self.simulation_enabled;
            self.active = Some(entity.id);
            events.push(SceneEvent::EntityCreated(entity.descriptor()));
            self.entities.push(entity);
        }

        let label = format!("{} {}", params.color, params.shape);
        let summary = match params.count {
            1 => format!("Created a {label}"),
            n => format!("Created {n} {label}s"),
        };
        (summary, events)
    }

    fn active_mut(&mut self, kind: ActionKind) -> Result<&mut Entity, CommandError> {
        let id = self.active.ok_or(CommandError::NoActiveEntity(kind))?;
        self.entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(CommandError::NoActiveEntity(kind))
    }

    fn translate(
        &mut self,
        kind: ActionKind,
        params: MoveParams,
    ) -> Result<(String, Vec<SceneEvent>), CommandError> {
        let entity = self.active_mut(kind)?;
        // The offset is in the entity's own frame, so it is stretched by its scale.
        entity.position += params.offset() * entity.scale;
        let summary = format!(
            "Moved the {} {}{} by {}m",
            entity.label(),
            if params.direction.factor() > 0.0 { "+" } else { "-" },
            params.axis,
            params.distance
        );
        Ok((summary, vec![transform_event(entity)]))
    }

    fn rescale(
        &mut self,
        kind: ActionKind,
        params: ScaleParams,
    ) -> Result<(String, Vec<SceneEvent>), CommandError> {
        let entity = self.active_mut(kind)?;
        entity.scale *= params.factor;
        let summary = format!("Scaled the {} by {}", entity.label(), params.factor);
        Ok((summary, vec![transform_event(entity)]))
    }

    fn restyle(
        &mut self,
        kind: ActionKind,
        params: ModifyParams,
    ) -> Result<(String, Vec<SceneEvent>), CommandError> {
        let entity = self.active_mut(kind)?;
        entity.material = params.material();
        let summary = format!(
            "Changed the material to {}{}",
            if params.metallic { "metallic " } else { "" },
            params.color
        );
        let event = SceneEvent::EntityUpdated {
            id: entity.id,
            change: EntityChange::Material(entity.material),
        };
        Ok((summary, vec![event]))
    }

    fn switch_simulation(&mut self, params: SystemParams) -> (String, Vec<SceneEvent>) {
        let enabled = params.is_on();
        if enabled == self.simulation_enabled {
            let state = if enabled { "running" } else { "stopped" };
            return (format!("Simulation already {state}"), Vec::new());
        }

        self.simulation_enabled = enabled;
        for entity in &mut self.entities {
            entity.simulated = enabled;
        }
        info!(enabled, entities = self.entities.len(), "Simulation toggled");

        let summary = if enabled { "Simulation started" } else { "Simulation stopped" };
        let event = SceneEvent::SimulationToggled {
            enabled,
            entities: self.entities.iter().map(|e| e.id).collect(),
        };
        (summary.to_string(), vec![event])
    }
}

fn transform_event(entity: &Entity) -> SceneEvent {
    SceneEvent::EntityUpdated {
        id: entity.id,
        change: EntityChange::Transform {
            position: entity.position,
            scale: entity.scale,
        },
    }
}

fn failed_kind(error: &CommandError) -> Option<ActionKind> {
    match error {
        CommandError::ExtractionFailure { kind, .. } | CommandError::NoActiveEntity(kind) => {
            Some(*kind)
        }
        CommandError::ClassificationFailure(_)
        | CommandError::UnrecognizedActionKind(_)
        | CommandError::SceneUnavailable => None,
    }
}
