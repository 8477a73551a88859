use glam::Vec3;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a simulated object.
pub type EntityId = Uuid;

/// Mesh kind of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[serde(alias = "cube")]
    Box,
    #[serde(alias = "ball", alias = "orb")]
    Sphere,
    Cone,
    Cylinder,
}

impl Shape {
    /// Volume of a shape of the given size, used as its mass.
    ///
    /// `size` is the edge length for a box and the height (and diameter) for
    /// the round shapes.
    pub fn volume(self, size: f32) -> f32 {
        let r = size / 2.0;
        match self {
            Shape::Box => size * size * size,
            Shape::Sphere => 4.0 / 3.0 * PI * r * r * r,
            Shape::Cone => PI * r * r * size / 3.0,
            Shape::Cylinder => PI * r * r * size,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Box => "box",
            Shape::Sphere => "sphere",
            Shape::Cone => "cone",
            Shape::Cylinder => "cylinder",
        };
        f.write_str(name)
    }
}

/// The twelve standard colors an entity can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Black,
    Blue,
    Brown,
    Cyan,
    #[serde(alias = "grey")]
    Gray,
    Green,
    Magenta,
    Orange,
    Purple,
    Red,
    White,
    Yellow,
}

impl Color {
    pub const ALL: [Color; 12] = [
        Color::Black,
        Color::Blue,
        Color::Brown,
        Color::Cyan,
        Color::Gray,
        Color::Green,
        Color::Magenta,
        Color::Orange,
        Color::Purple,
        Color::Red,
        Color::White,
        Color::Yellow,
    ];

    /// sRGB components in `0.0..=1.0`, for renderers without named colors.
    pub fn rgb(self) -> [f32; 3] {
        match self {
            Color::Black => [0.0, 0.0, 0.0],
            Color::Blue => [0.0, 0.0, 1.0],
            Color::Brown => [0.6, 0.4, 0.2],
            Color::Cyan => [0.0, 1.0, 1.0],
            Color::Gray => [0.5, 0.5, 0.5],
            Color::Green => [0.0, 1.0, 0.0],
            Color::Magenta => [1.0, 0.0, 1.0],
            Color::Orange => [1.0, 0.5, 0.0],
            Color::Purple => [0.5, 0.0, 0.5],
            Color::Red => [1.0, 0.0, 0.0],
            Color::White => [1.0, 1.0, 1.0],
            Color::Yellow => [1.0, 1.0, 0.0],
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Color::Black => "black",
            Color::Blue => "blue",
            Color::Brown => "brown",
            Color::Cyan => "cyan",
            Color::Gray => "gray",
            Color::Green => "green",
            Color::Magenta => "magenta",
            Color::Orange => "orange",
            Color::Purple => "purple",
            Color::Red => "red",
            Color::White => "white",
            Color::Yellow => "yellow",
        };
        f.write_str(name)
    }
}

/// Surface appearance of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub color: Color,
    pub metallic: bool,
    /// 0 is mirror-like, 1 is fully matte.
    pub roughness: f32,
}

/// A simulated object in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub shape: Shape,
    /// Edge length or diameter, in meters.
    pub size: f32,
    pub material: Material,
    pub position: Vec3,
    pub scale: Vec3,
    /// Whether the entity takes part in the attraction simulation.
    pub simulated: bool,
}

impl Entity {
    /// Creates a unit-scale entity at `position`.
    pub fn new(shape: Shape, size: f32, material: Material, position: Vec3) -> Self {
        Self {
            id: Uuid::new_v4(),
            shape,
            size,
            material,
            position,
            scale: Vec3::ONE,
            simulated: false,
        }
    }

    pub fn mass(&self) -> f32 {
        self.shape.volume(self.size)
    }

    /// The description handed to a renderer to instantiate this entity.
    pub fn descriptor(&self) -> EntityDescriptor {
        EntityDescriptor {
            id: self.id,
            shape: self.shape,
            size: self.size,
            mass: self.mass(),
            material: self.material,
            position: self.position,
            scale: self.scale,
            simulated: self.simulated,
        }
    }

    /// Short human-readable label, e.g. "red sphere".
    pub fn label(&self) -> String {
        format!("{} {}", self.material.color, self.shape)
    }
}

/// Everything a renderer needs to instantiate an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub shape: Shape,
    pub size: f32,
    pub mass: f32,
    pub material: Material,
    pub position: Vec3,
    pub scale: Vec3,
    pub simulated: bool,
}
