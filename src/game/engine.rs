//! Simulation engine: level + balls + goal detection on top of the physics world.
//!
//! The same engine runs authoritatively on the server and locally inside the
//! client predictor.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::ids::PlayerId;
use crate::level::{Goal, LevelDefinition, LevelError, Point};

use super::physics::{PhysicsWorld, SpawnError};
use super::snapshot::{BallState, Snapshot};
use super::InputState;

pub struct Engine {
    world: PhysicsWorld,
    level: Option<LevelDefinition>,
    goals: Vec<Goal>,
    tick: u64,
    simulated_secs: f64,
    /// Players whose ball reached a goal since the last level load
    finished: HashSet<PlayerId>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            world: PhysicsWorld::new(),
            level: None,
            goals: Vec::new(),
            tick: 0,
            simulated_secs: 0.0,
            finished: HashSet::new(),
        }
    }

    /// Build the level's geometry. Drops every ball and clears finish state;
    /// the tick counter keeps running. On error the previous level stays.
    pub fn load_level(&mut self, level: LevelDefinition) -> Result<(), LevelError> {
        let mut world = PhysicsWorld::new();
        world.load_level(&level)?;
        self.world = world;
        self.goals = level.goals();
        self.finished.clear();
        info!(level_id = %level.id, goals = self.goals.len(), "Engine loaded level");
        self.level = Some(level);
        Ok(())
    }

    pub fn level(&self) -> Option<&LevelDefinition> {
        self.level.as_ref()
    }

    pub fn spawn_player(&mut self, id: &PlayerId) -> Result<Point, SpawnError> {
        self.world.spawn_player(id)
    }

    pub fn spawn_player_at(&mut self, id: &PlayerId, x: f32, y: f32) -> Result<(), SpawnError> {
        self.world.spawn_player_at(id, x, y)
    }

    pub fn remove_player(&mut self, id: &PlayerId) -> bool {
        self.finished.remove(id);
        self.world.remove_ball(id)
    }

    /// Apply one tick of inputs, advance the world once, and report the
    /// players that reached a goal for the first time this level.
    pub fn step(&mut self, inputs: &[(PlayerId, InputState)]) -> Vec<PlayerId> {
        for (id, input) in inputs {
            if input.move_x != 0.0 {
                self.world.push_ball(id, input.move_x);
            }
            if input.jump_pressed {
                let (dx, dy) = input.launch_vector();
                self.world.launch_ball(id, dx, dy);
            }
        }

        self.world.step();
        self.tick += 1;
        self.simulated_secs += f64::from(self.world.timestep());

        self.detect_finishes()
    }

    fn detect_finishes(&mut self) -> Vec<PlayerId> {
        let snapshot = self.world.snapshot(self.tick);
        let mut newly_finished = Vec::new();
        for ball in &snapshot.balls {
            if self.finished.contains(&ball.id) || !self.in_goal(ball) {
                continue;
            }
            debug!(player_id = %ball.id, tick = self.tick, "Ball entered goal");
            self.finished.insert(ball.id.clone());
            newly_finished.push(ball.id.clone());
        }
        newly_finished
    }

    fn in_goal(&self, ball: &BallState) -> bool {
        self.goals.iter().any(|goal| {
            let dx = ball.x - goal.center.x;
            let dy = ball.y - goal.center.y;
            dx * dx + dy * dy <= goal.radius * goal.radius
        })
    }

    /// Whether the player's ball currently overlaps a goal region
    pub fn is_in_goal(&self, id: &PlayerId) -> bool {
        self.world
            .ball_state(id)
            .map(|ball| self.in_goal(&ball))
            .unwrap_or(false)
    }

    pub fn has_finished(&self, id: &PlayerId) -> bool {
        self.finished.contains(id)
    }

    /// Record a finish that was established outside `step`. Returns false if
    /// the player had already finished this level.
    pub fn mark_finished(&mut self, id: &PlayerId) -> bool {
        self.finished.insert(id.clone())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.world.snapshot(self.tick)
    }

    pub fn ball_state(&self, id: &PlayerId) -> Option<BallState> {
        self.world.ball_state(id)
    }

    pub fn set_ball_state(&mut self, state: &BallState) -> bool {
        self.world.set_ball_state(state)
    }

    pub fn has_ball(&self, id: &PlayerId) -> bool {
        self.world.has_ball(id)
    }

    pub fn ball_count(&self) -> usize {
        self.world.ball_count()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Total time advanced by `step`, in seconds
    pub fn simulated_secs(&self) -> f64 {
        self.simulated_secs
    }

    pub fn timestep(&self) -> f32 {
        self.world.timestep()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
