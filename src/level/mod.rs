//! Level definitions (geometry only) and the external level store client

pub mod store;

pub use store::{HttpLevelStore, InMemoryLevelStore, LevelStore, LevelStoreError};

use serde::{Deserialize, Serialize};

/// A point in scene units (pixels, y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A single object placed in a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LevelObject {
    /// Axis-aligned static box, positioned by its center
    Platform {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    /// Arbitrary simple polygon (convex or concave), vertices in order
    Polygon { vertices: Vec<Point> },
    /// Where a ball may be placed at level start
    Spawn { x: f32, y: f32 },
    /// Circular finish region
    Goal { x: f32, y: f32, radius: f32 },
}

/// Immutable level geometry as served by the level store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub id: String,
    pub name: String,
    pub objects: Vec<LevelObject>,
}

/// Goal marker extracted from a level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Goal {
    pub center: Point,
    pub radius: f32,
}

impl LevelDefinition {
    /// Spawn points in declaration order
    pub fn spawn_points(&self) -> Vec<Point> {
        self.objects
            .iter()
            .filter_map(|o| match o {
                LevelObject::Spawn { x, y } => Some(Point::new(*x, *y)),
                _ => None,
            })
            .collect()
    }

    pub fn goals(&self) -> Vec<Goal> {
        self.objects
            .iter()
            .filter_map(|o| match o {
                LevelObject::Goal { x, y, radius } => Some(Goal {
                    center: Point::new(*x, *y),
                    radius: *radius,
                }),
                _ => None,
            })
            .collect()
    }

    /// Reject geometry the physics world cannot build
    pub fn validate(&self) -> Result<(), LevelError> {
        for (index, object) in self.objects.iter().enumerate() {
            match object {
                LevelObject::Platform { width, height, .. } => {
                    if *width <= 0.0 || *height <= 0.0 {
                        return Err(LevelError::InvalidPlatform { index });
                    }
                }
                LevelObject::Polygon { vertices } => {
                    if vertices.len() < 3 {
                        return Err(LevelError::DegeneratePolygon {
                            index,
                            vertices: vertices.len(),
                        });
                    }
                }
                LevelObject::Goal { radius, .. } => {
                    if *radius <= 0.0 {
                        return Err(LevelError::InvalidGoal { index });
                    }
                }
                LevelObject::Spawn { .. } => {}
            }
        }
        Ok(())
    }
}

/// Longest level id accepted from clients
pub const MAX_LEVEL_ID_LEN: usize = 64;

/// Level ids are opaque slugs: ASCII letters, digits, `-` and `_`
pub fn is_valid_level_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_LEVEL_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Malformed level geometry
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LevelError {
    #[error("platform at index {index} has a non-positive size")]
    InvalidPlatform { index: usize },

    #[error("polygon at index {index} has {vertices} vertices (need at least 3)")]
    DegeneratePolygon { index: usize, vertices: usize },

    #[error("polygon at index {index} could not be triangulated")]
    Untriangulable { index: usize },

    #[error("goal at index {index} has a non-positive radius")]
    InvalidGoal { index: usize },
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Floor, a ramp polygon, two spawn points and a goal off to the right
    pub fn two_spawn_level() -> LevelDefinition {
        LevelDefinition {
            id: "meadow".to_string(),
            name: "Meadow".to_string(),
            objects: vec![
                LevelObject::Platform {
                    x: 400.0,
                    y: 500.0,
                    width: 800.0,
                    height: 40.0,
                },
                LevelObject::Polygon {
                    vertices: vec![
                        Point::new(600.0, 480.0),
                        Point::new(700.0, 480.0),
                        Point::new(700.0, 420.0),
                    ],
                },
                LevelObject::Spawn { x: 100.0, y: 400.0 },
                LevelObject::Spawn { x: 160.0, y: 400.0 },
                LevelObject::Goal {
                    x: 750.0,
                    y: 440.0,
                    radius: 30.0,
                },
            ],
        }
    }
}
