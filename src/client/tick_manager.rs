//! Client tick pacer: turns frame deltas into whole simulation steps and
//! nudges the local tick toward `server_tick + lead_ticks`.

use tracing::trace;

/// Frames longer than this (tab in background, debugger pause) are clamped
/// so a single frame cannot flood the predictor.
const MAX_FRAME_DELTA_MS: f64 = 250.0;

#[derive(Debug, Clone)]
pub struct TickManager {
    tick_duration_ms: f64,
    accumulator_ms: f64,
    tick: u64,
    /// Highest tick the server has reported
    server_tick: Option<u64>,
    lead_ticks: u64,
    max_catchup_ticks: u64,
}

impl TickManager {
    pub fn new(tick_duration_ms: f64, lead_ticks: u64, max_catchup_ticks: u64) -> Self {
        Self {
            tick_duration_ms,
            accumulator_ms: 0.0,
            tick: 0,
            server_tick: None,
            lead_ticks,
            max_catchup_ticks,
        }
    }

    /// Record a server tick; older or repeated ticks are ignored
    pub fn observe_server_tick(&mut self, tick: u64) {
        self.server_tick = Some(self.server_tick.map_or(tick, |t| t.max(tick)));
    }

    /// Number of steps to run this frame. Advances the local tick by that much.
    pub fn update(&mut self, frame_delta_ms: f64) -> u64 {
        self.accumulator_ms += frame_delta_ms.clamp(0.0, MAX_FRAME_DELTA_MS);
        let mut steps = (self.accumulator_ms / self.tick_duration_ms).floor() as u64;
        self.accumulator_ms -= steps as f64 * self.tick_duration_ms;

        if let Some(server_tick) = self.server_tick {
            let target = server_tick + self.lead_ticks;
            let after = self.tick + steps;
            if after < target {
                let extra = (target - after).min(self.max_catchup_ticks);
                trace!(extra, target, "Catching up to server");
                steps += extra;
            } else if after > target {
                let excess = after - target;
                trace!(excess, target, "Ahead of server, suppressing steps");
                steps = steps.saturating_sub(excess);
            }
        }

        self.tick += steps;
        steps
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn server_tick(&self) -> Option<u64> {
        self.server_tick
    }
}
