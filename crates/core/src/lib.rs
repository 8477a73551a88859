pub mod action;
pub mod attraction;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod extraction;
pub mod history;
pub mod listening;
pub mod params;
pub mod runtime;
pub mod speech;
pub mod utterance;

use entity::{EntityDescriptor, EntityId, Material};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Changes the core asks an external renderer to apply.
///
/// This enum decouples command interpretation from whatever instantiates
/// meshes and integrates forces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneEvent {
    /// Instantiate a new entity.
    EntityCreated(EntityDescriptor),
    /// Update an existing entity.
    EntityUpdated { id: EntityId, change: EntityChange },
    /// The simulation switch flipped; `entities` were enrolled or unenrolled.
    SimulationToggled {
        enabled: bool,
        entities: Vec<EntityId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityChange {
    Transform { position: Vec3, scale: Vec3 },
    Material(Material),
}
