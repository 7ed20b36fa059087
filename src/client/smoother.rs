//! Remote ball smoothing: per-player buffers of timestamped server samples,
//! sampled a fixed delay in the past.

use std::collections::{HashMap, VecDeque};

use crate::game::BallState;
use crate::ids::PlayerId;

pub const DEFAULT_BUFFER_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
struct Sample {
    seq: u64,
    received_at_ms: f64,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    angle: f32,
}

/// Position and rotation to draw a remote ball at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

#[derive(Debug)]
pub struct RemoteSmoother {
    buffers: HashMap<PlayerId, VecDeque<Sample>>,
    capacity: usize,
}

impl RemoteSmoother {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            capacity: capacity.max(2),
        }
    }

    /// Buffer a sample. Samples whose sequence is not newer than the last
    /// one kept are dropped; returns whether this one was kept.
    pub fn push(&mut self, state: &BallState, seq: u64, received_at_ms: f64) -> bool {
        let buffer = self.buffers.entry(state.id.clone()).or_default();
        if buffer.back().is_some_and(|last| last.seq >= seq) {
            return false;
        }

        buffer.push_back(Sample {
            seq,
            received_at_ms,
            x: state.x,
            y: state.y,
            vx: state.vx,
            vy: state.vy,
            angle: state.angle,
        });
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
        true
    }

    /// Interpolate between the two samples around `render_time_ms`. Past the
    /// newest sample, extrapolate along its velocity for at most
    /// `extrapolation_cap_ms` with rotation frozen.
    pub fn sample(
        &self,
        id: &PlayerId,
        render_time_ms: f64,
        extrapolation_cap_ms: f64,
    ) -> Option<RenderState> {
        let buffer = self.buffers.get(id)?;
        let newest = buffer.back()?;

        let after = buffer.partition_point(|s| s.received_at_ms <= render_time_ms);
        if after == 0 {
            let oldest = &buffer[0];
            return Some(RenderState {
                x: oldest.x,
                y: oldest.y,
                angle: oldest.angle,
            });
        }

        if after == buffer.len() {
            let ahead_secs =
                ((render_time_ms - newest.received_at_ms).min(extrapolation_cap_ms) / 1000.0) as f32;
            return Some(RenderState {
                x: newest.x + newest.vx * ahead_secs,
                y: newest.y + newest.vy * ahead_secs,
                angle: newest.angle,
            });
        }

        let a = &buffer[after - 1];
        let b = &buffer[after];
        let span = b.received_at_ms - a.received_at_ms;
        let t = if span > 0.0 {
            ((render_time_ms - a.received_at_ms) / span) as f32
        } else {
            0.0
        };

        Some(RenderState {
            x: lerp(a.x, b.x, t),
            y: lerp(a.y, b.y, t),
            angle: lerp_angle(a.angle, b.angle, t),
        })
    }

    pub fn remove(&mut self, id: &PlayerId) {
        self.buffers.remove(id);
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn buffered(&self, id: &PlayerId) -> usize {
        self.buffers.get(id).map_or(0, VecDeque::len)
    }

    /// Sequence numbers currently buffered for a player, oldest first
    pub fn sequences(&self, id: &PlayerId) -> Vec<u64> {
        self.buffers
            .get(id)
            .map(|buffer| buffer.iter().map(|s| s.seq).collect())
            .unwrap_or_default()
    }
}

impl Default for RemoteSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Interpolate along the shorter arc
fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let delta = (b - a + PI).rem_euclid(TAU) - PI;
    a + delta * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn state(x: f32, y: f32, vx: f32) -> BallState {
        BallState {
            id: "remote".into(),
            x,
            y,
            vx,
            vy: 0.0,
            angle: 0.0,
            angular_velocity: 0.0,
        }
    }

    #[test]
    fn out_of_order_sequence_is_dropped() {
        let mut smoother = RemoteSmoother::default();
        assert!(smoother.push(&state(0.0, 0.0, 0.0), 5, 100.0));
        assert!(!smoother.push(&state(0.0, 0.0, 0.0), 3, 110.0));
        assert!(smoother.push(&state(0.0, 0.0, 0.0), 7, 120.0));

        assert_eq!(smoother.sequences(&"remote".into()), vec![5, 7]);
    }

    #[test]
    fn midpoint_is_the_mean() {
        let mut smoother = RemoteSmoother::default();
        smoother.push(&state(10.0, 20.0, 0.0), 1, 100.0);
        smoother.push(&state(30.0, 60.0, 0.0), 2, 200.0);

        let at = smoother.sample(&"remote".into(), 150.0, 100.0).unwrap();
        assert_approx_eq!(at.x, 20.0, 1e-4);
        assert_approx_eq!(at.y, 40.0, 1e-4);
    }

    #[test]
    fn before_first_sample_holds_oldest() {
        let mut smoother = RemoteSmoother::default();
        smoother.push(&state(10.0, 0.0, 0.0), 1, 100.0);
        smoother.push(&state(30.0, 0.0, 0.0), 2, 200.0);

        assert_eq!(smoother.sample(&"remote".into(), 50.0, 100.0).unwrap().x, 10.0);
    }

    #[test]
    fn extrapolation_is_capped() {
        let mut smoother = RemoteSmoother::default();
        smoother.push(&state(0.0, 0.0, 100.0), 1, 0.0);

        let near = smoother.sample(&"remote".into(), 50.0, 100.0).unwrap();
        assert_approx_eq!(near.x, 5.0, 1e-4);

        let far = smoother.sample(&"remote".into(), 5_000.0, 100.0).unwrap();
        assert_approx_eq!(far.x, 10.0, 1e-4);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut smoother = RemoteSmoother::new(3);
        for seq in 1..=5 {
            smoother.push(&state(0.0, 0.0, 0.0), seq, seq as f64 * 10.0);
        }
        assert_eq!(smoother.sequences(&"remote".into()), vec![3, 4, 5]);
    }

    #[test]
    fn angle_takes_short_way_round() {
        use std::f32::consts::PI;
        let mid = lerp_angle(PI - 0.1, -PI + 0.1, 0.5);
        assert_approx_eq!(mid.abs(), PI, 1e-4);
    }

    #[test]
    fn unknown_player_has_no_sample() {
        let smoother = RemoteSmoother::default();
        assert!(smoother.sample(&"nobody".into(), 0.0, 100.0).is_none());
    }
}
