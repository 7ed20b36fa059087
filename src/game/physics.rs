//! Rigid-body world: one dynamic ball per player plus static level geometry.
//!
//! Physics runs in meters; everything that crosses the module boundary
//! (level geometry in, ball states out) is in scene pixels and converted
//! with [`to_physics`]/[`to_scene`].

use std::collections::BTreeMap;

use rapier2d::na::UnitComplex;
use rapier2d::prelude::*;
use tracing::{debug, warn};

use crate::ids::PlayerId;
use crate::level::{LevelDefinition, LevelError, LevelObject, Point};
use crate::util::time::tick_delta;

use super::geometry::{centroid, signed_area, to_physics, to_scene, triangulate};
use super::snapshot::{BallState, Snapshot};

/// Ball radius in scene pixels
pub const BALL_RADIUS_PX: f32 = 12.0;
/// Downward gravity in m/s² (scene y grows downward)
pub const GRAVITY: f32 = 20.0;
/// Impulse (N·s) per unit of launch vector
pub const LAUNCH_IMPULSE: f32 = 4.0;
/// Per-tick lateral impulse for a full move input
pub const MOVE_IMPULSE: f32 = 0.12;

const LINEAR_DAMPING: f32 = 0.15;
const ANGULAR_DAMPING: f32 = 0.4;
const BALL_RESTITUTION: f32 = 0.35;
const BALL_FRICTION: f32 = 0.7;
const GROUND_FRICTION: f32 = 0.8;
/// Two positions closer than this (pixels) count as the same spot
const SPAWN_EPSILON_PX: f32 = 0.01;

/// Why a ball could not be placed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("no free spawn point")]
    NoFreeSpawnPoint,

    #[error("player already has a ball")]
    AlreadySpawned,
}

/// The rapier pipeline and every body it owns
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    /// Ordered so iteration (and therefore snapshots) is deterministic
    balls: BTreeMap<PlayerId, RigidBodyHandle>,
    spawn_points: Vec<Point>,
    static_bodies: usize,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let integration_params = IntegrationParameters {
            dt: tick_delta(),
            ..IntegrationParameters::default()
        };

        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, GRAVITY],
            integration_params,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            balls: BTreeMap::new(),
            spawn_points: Vec::new(),
            static_bodies: 0,
        }
    }

    /// Replace the world with a fresh one built from `level`.
    ///
    /// Every existing ball is discarded; callers respawn players afterwards.
    pub fn load_level(&mut self, level: &LevelDefinition) -> Result<(), LevelError> {
        level.validate()?;
        *self = Self::new();

        for (index, object) in level.objects.iter().enumerate() {
            match object {
                LevelObject::Platform {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let body = RigidBodyBuilder::fixed()
                        .translation(vector![to_physics(*x), to_physics(*y)])
                        .build();
                    let handle = self.bodies.insert(body);
                    let collider = ColliderBuilder::cuboid(
                        to_physics(*width / 2.0),
                        to_physics(*height / 2.0),
                    )
                    .friction(GROUND_FRICTION)
                    .build();
                    self.colliders
                        .insert_with_parent(collider, handle, &mut self.bodies);
                    self.static_bodies += 1;
                }
                LevelObject::Polygon { vertices } => {
                    self.insert_polygon(index, vertices)?;
                }
                LevelObject::Spawn { x, y } => self.spawn_points.push(Point::new(*x, *y)),
                LevelObject::Goal { .. } => {}
            }
        }

        debug!(
            level_id = %level.id,
            static_bodies = self.static_bodies,
            spawn_points = self.spawn_points.len(),
            "Level geometry loaded"
        );
        Ok(())
    }

    /// One fixed body at the polygon's centroid carrying a triangle
    /// collider per ear-clipped triangle.
    fn insert_polygon(&mut self, index: usize, vertices: &[Point]) -> Result<(), LevelError> {
        let triangles = triangulate(vertices).ok_or(LevelError::Untriangulable { index })?;
        let anchor = centroid(vertices);

        let body = RigidBodyBuilder::fixed()
            .translation(vector![to_physics(anchor.x), to_physics(anchor.y)])
            .build();
        let handle = self.bodies.insert(body);

        let local = |p: Point| point![to_physics(p.x - anchor.x), to_physics(p.y - anchor.y)];
        for [a, b, c] in triangles {
            let (a, b, c) = (vertices[a], vertices[b], vertices[c]);
            if signed_area(&[a, b, c]).abs() < f32::EPSILON {
                continue;
            }
            let collider = ColliderBuilder::triangle(local(a), local(b), local(c))
                .friction(GROUND_FRICTION)
                .build();
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);
        }

        self.static_bodies += 1;
        Ok(())
    }

    /// Place a ball at the first spawn point no other ball sits exactly on
    pub fn spawn_player(&mut self, id: &PlayerId) -> Result<Point, SpawnError> {
        if self.balls.contains_key(id) {
            return Err(SpawnError::AlreadySpawned);
        }

        let occupied: Vec<Point> = self
            .balls
            .keys()
            .filter_map(|ball_id| self.ball_state(ball_id))
            .map(|state| Point::new(state.x, state.y))
            .collect();

        let free = self
            .spawn_points
            .iter()
            .copied()
            .find(|spawn| {
                !occupied.iter().any(|p| {
                    (p.x - spawn.x).abs() < SPAWN_EPSILON_PX
                        && (p.y - spawn.y).abs() < SPAWN_EPSILON_PX
                })
            })
            .ok_or(SpawnError::NoFreeSpawnPoint)?;

        self.spawn_player_at(id, free.x, free.y)?;
        Ok(free)
    }

    /// Place a ball at an explicit scene position
    pub fn spawn_player_at(&mut self, id: &PlayerId, x: f32, y: f32) -> Result<(), SpawnError> {
        if self.balls.contains_key(id) {
            return Err(SpawnError::AlreadySpawned);
        }

        let body = RigidBodyBuilder::dynamic()
            .translation(vector![to_physics(x), to_physics(y)])
            .linear_damping(LINEAR_DAMPING)
            .angular_damping(ANGULAR_DAMPING)
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(body);
        let collider = ColliderBuilder::ball(to_physics(BALL_RADIUS_PX))
            .restitution(BALL_RESTITUTION)
            .friction(BALL_FRICTION)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        self.balls.insert(id.clone(), handle);
        Ok(())
    }

    /// Remove a player's ball. Returns false when there was none.
    pub fn remove_ball(&mut self, id: &PlayerId) -> bool {
        let Some(handle) = self.balls.remove(id) else {
            return false;
        };
        self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        true
    }

    /// Wake the ball and apply an instantaneous impulse along (dx, dy)
    pub fn launch_ball(&mut self, id: &PlayerId, dx: f32, dy: f32) {
        self.apply_impulse(id, dx * LAUNCH_IMPULSE, dy * LAUNCH_IMPULSE);
    }

    /// Lateral steering for one tick, `direction` in [-1, 1]
    pub fn push_ball(&mut self, id: &PlayerId, direction: f32) {
        self.apply_impulse(id, direction.clamp(-1.0, 1.0) * MOVE_IMPULSE, 0.0);
    }

    fn apply_impulse(&mut self, id: &PlayerId, ix: f32, iy: f32) {
        let Some(body) = self
            .balls
            .get(id)
            .and_then(|handle| self.bodies.get_mut(*handle))
        else {
            warn!(player_id = %id, "Impulse for unknown ball ignored");
            return;
        };
        body.wake_up(true);
        body.apply_impulse(vector![ix, iy], true);
    }

    /// Advance every body by exactly one fixed timestep
    pub fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// Fixed timestep in seconds
    pub fn timestep(&self) -> f32 {
        self.integration_params.dt
    }

    pub fn ball_state(&self, id: &PlayerId) -> Option<BallState> {
        let body = self.bodies.get(*self.balls.get(id)?)?;
        let position = body.translation();
        let velocity = body.linvel();
        Some(BallState {
            id: id.clone(),
            x: to_scene(position.x),
            y: to_scene(position.y),
            vx: to_scene(velocity.x),
            vy: to_scene(velocity.y),
            angle: body.rotation().angle(),
            angular_velocity: body.angvel(),
        })
    }

    /// Overwrite a ball's full kinematic state. Returns false for unknown ids.
    pub fn set_ball_state(&mut self, state: &BallState) -> bool {
        let Some(body) = self
            .balls
            .get(&state.id)
            .and_then(|handle| self.bodies.get_mut(*handle))
        else {
            warn!(player_id = %state.id, "State overwrite for unknown ball ignored");
            return false;
        };
        body.set_translation(vector![to_physics(state.x), to_physics(state.y)], true);
        body.set_linvel(vector![to_physics(state.vx), to_physics(state.vy)], true);
        body.set_rotation(UnitComplex::new(state.angle), true);
        body.set_angvel(state.angular_velocity, true);
        true
    }

    pub fn snapshot(&self, tick: u64) -> Snapshot {
        Snapshot {
            tick,
            balls: self
                .balls
                .keys()
                .filter_map(|id| self.ball_state(id))
                .collect(),
        }
    }

    pub fn has_ball(&self, id: &PlayerId) -> bool {
        self.balls.contains_key(id)
    }

    pub fn ball_count(&self) -> usize {
        self.balls.len()
    }

    pub fn spawn_points(&self) -> &[Point] {
        &self.spawn_points
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}
