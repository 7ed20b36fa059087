//! Game simulation modules

pub mod engine;
pub mod geometry;
pub mod r#match;
pub mod physics;
pub mod simulation;
pub mod snapshot;

pub use engine::Engine;
pub use r#match::{
    JoinRequest, MatchCommand, MatchError, MatchHandle, MatchPhase, MatchRegistry, MatchSettings,
};
pub use simulation::{Simulation, TickOutcome};
pub use snapshot::{BallState, Snapshot};

use serde::{Deserialize, Serialize};

/// Input state for a single tick (carried by `player_state`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputState {
    /// Lateral steering, -1.0 (left) to 1.0 (right)
    pub move_x: f32,
    /// Optional launch vector; zero means "straight up, biased by move_x"
    pub launch_x: f32,
    pub launch_y: f32,
    /// Fires once on the transition into pressed
    pub jump_pressed: bool,
    /// Continuous key state
    pub jump_held: bool,
}

impl InputState {
    /// Launch direction for a pressed jump, at most unit length
    pub fn launch_vector(&self) -> (f32, f32) {
        let (dx, dy) = if self.launch_x != 0.0 || self.launch_y != 0.0 {
            (self.launch_x, self.launch_y)
        } else {
            (self.move_x.clamp(-1.0, 1.0) * 0.5, -1.0)
        };

        let len = (dx * dx + dy * dy).sqrt();
        if len > 1.0 {
            (dx / len, dy / len)
        } else {
            (dx, dy)
        }
    }
}
