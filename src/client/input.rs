//! Local input latch: keyboard/pointer events in, one `InputState` per tick out

use crate::game::InputState;

/// Accumulates input events between ticks. The jump press is an edge: it is
/// reported by exactly one `consume` call no matter how long the key is held.
#[derive(Debug, Clone, Default)]
pub struct LocalInput {
    move_x: f32,
    launch: Option<(f32, f32)>,
    jump_held: bool,
    jump_pressed: bool,
}

impl LocalInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lateral steering, clamped to [-1, 1]
    pub fn set_move(&mut self, move_x: f32) {
        self.move_x = move_x.clamp(-1.0, 1.0);
    }

    /// Aim for the next launch; `None` falls back to the move-based default
    pub fn set_launch(&mut self, launch: Option<(f32, f32)>) {
        self.launch = launch;
    }

    pub fn press_jump(&mut self) {
        if !self.jump_held {
            self.jump_pressed = true;
        }
        self.jump_held = true;
    }

    pub fn release_jump(&mut self) {
        self.jump_held = false;
    }

    /// Current state without clearing the press edge
    pub fn peek(&self) -> InputState {
        let (launch_x, launch_y) = self.launch.unwrap_or((0.0, 0.0));
        InputState {
            move_x: self.move_x,
            launch_x,
            launch_y,
            jump_pressed: self.jump_pressed,
            jump_held: self.jump_held,
        }
    }

    /// State for one tick; clears the press edge
    pub fn consume(&mut self) -> InputState {
        let state = self.peek();
        self.jump_pressed = false;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_is_reported_once_while_held() {
        let mut input = LocalInput::new();
        input.press_jump();
        // key repeat
        input.press_jump();

        let first = input.consume();
        assert!(first.jump_pressed && first.jump_held);

        let second = input.consume();
        assert!(!second.jump_pressed);
        assert!(second.jump_held);
    }

    #[test]
    fn release_and_press_again_is_a_new_edge() {
        let mut input = LocalInput::new();
        input.press_jump();
        input.consume();
        input.release_jump();
        assert!(!input.consume().jump_held);

        input.press_jump();
        assert!(input.consume().jump_pressed);
    }

    #[test]
    fn tap_between_ticks_is_not_lost() {
        let mut input = LocalInput::new();
        input.press_jump();
        input.release_jump();

        let state = input.consume();
        assert!(state.jump_pressed);
        assert!(!state.jump_held);
    }

    #[test]
    fn move_is_clamped_and_launch_carried() {
        let mut input = LocalInput::new();
        input.set_move(4.0);
        input.set_launch(Some((0.6, -0.8)));

        let state = input.peek();
        assert_eq!(state.move_x, 1.0);
        assert_eq!((state.launch_x, state.launch_y), (0.6, -0.8));
    }
}
