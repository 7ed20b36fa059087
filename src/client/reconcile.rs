//! Pluggable reconciliation of the locally predicted ball against
//! authoritative snapshots.
//!
//! The default strategy does nothing: the predicted ball keeps its own course
//! and server state for the local player is only observed. `RollbackReconciler`
//! is the opt-in alternative that rewinds and replays buffered input.

use tracing::debug;

use crate::game::BallState;

/// What the predictor should do with an authoritative sample
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    Keep,
    /// Hard-set the ball to `state` at `tick`, then replay every later input
    Rollback { tick: u64, state: BallState },
}

pub trait ReconcileStrategy: Send {
    /// `predicted` is the local ball at `server_tick`, if still buffered
    fn evaluate(
        &mut self,
        server_tick: u64,
        server: &BallState,
        predicted: Option<&BallState>,
        local_tick: u64,
    ) -> Correction;
}

/// Leaves the prediction untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconciliation;

impl ReconcileStrategy for NoReconciliation {
    fn evaluate(&mut self, _: u64, _: &BallState, _: Option<&BallState>, _: u64) -> Correction {
        Correction::Keep
    }
}

/// Rewinds when the prediction drifted further than `threshold_px` and the
/// server sample is recent enough to replay from.
#[derive(Debug, Clone)]
pub struct RollbackReconciler {
    pub threshold_px: f32,
    pub max_rollback_ticks: u64,
    rollbacks: u64,
}

impl RollbackReconciler {
    pub fn new(threshold_px: f32, max_rollback_ticks: u64) -> Self {
        Self {
            threshold_px,
            max_rollback_ticks,
            rollbacks: 0,
        }
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }
}

impl Default for RollbackReconciler {
    fn default() -> Self {
        Self::new(4.0, 30)
    }
}

impl ReconcileStrategy for RollbackReconciler {
    fn evaluate(
        &mut self,
        server_tick: u64,
        server: &BallState,
        predicted: Option<&BallState>,
        local_tick: u64,
    ) -> Correction {
        if local_tick.saturating_sub(server_tick) > self.max_rollback_ticks {
            return Correction::Keep;
        }
        let Some(predicted) = predicted else {
            return Correction::Keep;
        };

        let error = server.distance_to(predicted);
        if error <= self.threshold_px {
            return Correction::Keep;
        }

        self.rollbacks += 1;
        debug!(server_tick, local_tick, error, "Prediction diverged, rolling back");
        Correction::Rollback {
            tick: server_tick,
            state: server.clone(),
        }
    }
}
