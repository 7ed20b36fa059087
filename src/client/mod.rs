//! Client-side netcode: tick pacing, local prediction, reconciliation and
//! remote smoothing, wired together by `ClientRuntime`.
//!
//! Rendering and input capture live in the host application; it calls
//! `frame` once per display frame and `handle_server_message` for every
//! decoded message.

pub mod input;
pub mod prediction;
pub mod reconcile;
pub mod smoother;
pub mod tick_manager;

pub use input::LocalInput;
pub use prediction::{ChannelInputSender, InputSender, Prediction};
pub use reconcile::{Correction, NoReconciliation, ReconcileStrategy, RollbackReconciler};
pub use smoother::{RemoteSmoother, RenderState};
pub use tick_manager::TickManager;

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::game::{BallState, Snapshot};
use crate::ids::PlayerId;
use crate::util::time::TICK_DURATION_MS;
use crate::ws::protocol::ServerMsg;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// How many ticks ahead of the newest server tick the client runs
    pub lead_ticks: u64,
    /// Extra steps allowed per frame when behind
    pub max_catchup_ticks: u64,
    /// Remote balls are drawn this far in the past
    pub interpolation_delay_ms: f64,
    pub extrapolation_cap_ms: f64,
    pub smoother_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            lead_ticks: 2,
            max_catchup_ticks: 3,
            interpolation_delay_ms: 100.0,
            extrapolation_cap_ms: 150.0,
            smoother_capacity: smoother::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// What to draw this frame
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub steps: u64,
    pub local: Option<BallState>,
    pub remotes: Vec<(PlayerId, RenderState)>,
}

pub struct ClientRuntime<S: InputSender> {
    settings: ClientSettings,
    pacer: TickManager,
    prediction: Prediction<S>,
    smoother: RemoteSmoother,
    input: LocalInput,
    remotes: BTreeSet<PlayerId>,
}

impl<S: InputSender> ClientRuntime<S> {
    pub fn new(player_id: PlayerId, sender: S, settings: ClientSettings) -> Self {
        Self {
            pacer: TickManager::new(
                TICK_DURATION_MS as f64,
                settings.lead_ticks,
                settings.max_catchup_ticks,
            ),
            prediction: Prediction::new(player_id, sender),
            smoother: RemoteSmoother::new(settings.smoother_capacity),
            input: LocalInput::new(),
            remotes: BTreeSet::new(),
            settings,
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ReconcileStrategy>) -> Self {
        self.prediction = self.prediction.with_strategy(strategy);
        self
    }

    pub fn input_mut(&mut self) -> &mut LocalInput {
        &mut self.input
    }

    /// Advance prediction by however many ticks this frame is worth and
    /// sample remote balls at `now_ms - interpolation_delay_ms`.
    pub fn frame(&mut self, frame_delta_ms: f64, now_ms: f64) -> Frame {
        let steps = self.pacer.update(frame_delta_ms);
        let first_tick = self.pacer.tick() + 1 - steps;
        for tick in first_tick..=self.pacer.tick() {
            let input = self.input.consume();
            self.prediction.step(tick, input);
        }

        let render_time = now_ms - self.settings.interpolation_delay_ms;
        let remotes = self
            .remotes
            .iter()
            .filter_map(|id| {
                self.smoother
                    .sample(id, render_time, self.settings.extrapolation_cap_ms)
                    .map(|state| (id.clone(), state))
            })
            .collect();

        Frame {
            steps,
            local: self.prediction.ball_state(),
            remotes,
        }
    }

    pub fn handle_server_message(&mut self, msg: &ServerMsg, now_ms: f64) {
        match msg {
            ServerMsg::LoadLevel { level_definition } => {
                if let Err(e) = self.prediction.load_level(level_definition.clone()) {
                    warn!(level_id = %level_definition.id, error = %e, "Local level load failed");
                }
            }
            ServerMsg::InitializeWorld { snapshot } => {
                self.prediction.initialize(snapshot);
                self.smoother.clear();
                self.remotes.clear();
                self.observe(snapshot, now_ms);
            }
            ServerMsg::Snapshot(snapshot) => {
                self.observe(snapshot, now_ms);
                if self.prediction.on_server_snapshot(snapshot) {
                    debug!(tick = snapshot.tick, "Local ball corrected");
                }
            }
            _ => {}
        }
    }

    fn observe(&mut self, snapshot: &Snapshot, now_ms: f64) {
        self.pacer.observe_server_tick(snapshot.tick);

        let own_id = self.prediction.player_id().clone();
        let present: BTreeSet<PlayerId> = snapshot
            .balls
            .iter()
            .filter(|ball| ball.id != own_id)
            .map(|ball| {
                self.smoother.push(ball, snapshot.tick, now_ms);
                ball.id.clone()
            })
            .collect();

        for gone in self.remotes.difference(&present) {
            self.smoother.remove(gone);
        }
        self.remotes = present;
    }

    pub fn tick(&self) -> u64 {
        self.pacer.tick()
    }

    pub fn prediction(&self) -> &Prediction<S> {
        &self.prediction
    }

    pub fn smoother(&self) -> &RemoteSmoother {
        &self.smoother
    }
}
