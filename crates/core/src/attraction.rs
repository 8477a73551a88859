//! Attraction Simulation Step
//!
//! Inverse-square attraction of every enrolled body toward a fixed center and
//! toward every other enrolled body. The result is a force per body; integrating
//! it is left to the renderer's physics.

use crate::entity::EntityId;
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttractionParams {
    /// Strength of the pull toward the center.
    pub center_strength: f32,
    /// Strength of the pull between each pair of bodies.
    pub pair_strength: f32,
    /// Distances below this are treated as this distance.
    pub min_distance: f32,
}

impl Default for AttractionParams {
    fn default() -> Self {
        Self {
            center_strength: 0.05,
            pair_strength: 0.05,
            min_distance: 0.05,
        }
    }
}

/// An entity id with a position, as reported by or fed into the force pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub id: EntityId,
    pub position: Vec3,
}

/// The force acting on one body this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityForce {
    pub id: EntityId,
    pub force: Vec3,
}

/// Inverse-square pull from `from` toward `to`, scaled by `strength`.
///
/// Coincident points have no defined direction and contribute nothing.
fn pull(from: Vec3, to: Vec3, strength: f32, min_distance: f32) -> Vec3 {
    let delta = to - from;
    let distance_sq = delta.length_squared().max(min_distance * min_distance);
    delta.normalize_or_zero() * (strength / distance_sq)
}

/// Computes one force per body. O(n²) in the number of bodies.
pub fn attraction_forces(center: Vec3, bodies: &[Body], params: &AttractionParams) -> Vec<EntityForce> {
    bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            let center_force = pull(body.position, center, params.center_strength, params.min_distance);
            let pair_force: Vec3 = bodies
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| pull(body.position, other.position, params.pair_strength, params.min_distance))
                .sum();
            EntityForce {
                id: body.id,
                force: center_force + pair_force,
            }
        })
        .collect()
}
