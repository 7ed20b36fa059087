//! Client-side prediction of the local ball.
//!
//! The predictor owns a private `Engine` holding only the local player's ball.
//! Each tick it samples input, sends it to the server, steps the engine, and
//! records both the input and the resulting state in bounded histories keyed
//! by tick.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::{BallState, Engine, InputState, Snapshot};
use crate::ids::PlayerId;
use crate::level::{LevelDefinition, LevelError};
use crate::ws::protocol::ClientMsg;

use super::reconcile::{Correction, NoReconciliation, ReconcileStrategy};

/// Ticks of input and predicted state kept for replay
pub const HISTORY_TICKS: u64 = 120;

/// Where per-tick input goes. The live client sends over its socket.
pub trait InputSender: Send {
    fn send_input(&mut self, tick: u64, input: InputState);
}

/// Sends `player_state` messages into the socket writer's queue
pub struct ChannelInputSender {
    tx: mpsc::UnboundedSender<ClientMsg>,
}

impl ChannelInputSender {
    pub fn new(tx: mpsc::UnboundedSender<ClientMsg>) -> Self {
        Self { tx }
    }
}

impl InputSender for ChannelInputSender {
    fn send_input(&mut self, tick: u64, input: InputState) {
        if self.tx.send(ClientMsg::PlayerState { tick, input }).is_err() {
            debug!(tick, "Input dropped, socket writer gone");
        }
    }
}

pub struct Prediction<S: InputSender> {
    player_id: PlayerId,
    engine: Engine,
    sender: S,
    strategy: Box<dyn ReconcileStrategy>,
    last_tick: u64,
    history_ticks: u64,
    input_history: BTreeMap<u64, InputState>,
    predicted: BTreeMap<u64, BallState>,
}

impl<S: InputSender> Prediction<S> {
    pub fn new(player_id: PlayerId, sender: S) -> Self {
        Self {
            player_id,
            engine: Engine::new(),
            sender,
            strategy: Box::new(NoReconciliation),
            last_tick: 0,
            history_ticks: HISTORY_TICKS,
            input_history: BTreeMap::new(),
            predicted: BTreeMap::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ReconcileStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_history(mut self, history_ticks: u64) -> Self {
        self.history_ticks = history_ticks.max(1);
        self
    }

    pub fn load_level(&mut self, level: LevelDefinition) -> Result<(), LevelError> {
        self.engine.load_level(level)?;
        self.clear_history();
        Ok(())
    }

    /// Place the local ball where the authoritative world put it
    pub fn initialize(&mut self, snapshot: &Snapshot) {
        self.engine.remove_player(&self.player_id);
        self.clear_history();

        let Some(state) = snapshot.ball(&self.player_id) else {
            warn!(player_id = %self.player_id, tick = snapshot.tick, "Local ball missing from world");
            return;
        };
        if let Err(e) = self.engine.spawn_player_at(&self.player_id, state.x, state.y) {
            warn!(player_id = %self.player_id, error = %e, "Could not place local ball");
            return;
        }
        self.engine.set_ball_state(state);
        self.predicted.insert(snapshot.tick, state.clone());
    }

    /// Run one predicted tick
    pub fn step(&mut self, tick: u64, input: InputState) {
        self.sender.send_input(tick, input);
        self.input_history.insert(tick, input);
        self.last_tick = self.last_tick.max(tick);

        if self.engine.has_ball(&self.player_id) {
            self.engine.step(&[(self.player_id.clone(), input)]);
            if let Some(state) = self.engine.ball_state(&self.player_id) {
                self.predicted.insert(tick, state);
            }
        }

        self.prune();
    }

    /// Hand the local player's authoritative state to the reconcile strategy
    pub fn on_server_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        let Some(server) = snapshot.ball(&self.player_id) else {
            return false;
        };

        let correction = self.strategy.evaluate(
            snapshot.tick,
            server,
            self.predicted.get(&snapshot.tick),
            self.last_tick,
        );

        match correction {
            Correction::Keep => false,
            Correction::Rollback { tick, state } => {
                self.rollback(tick, &state);
                true
            }
        }
    }

    fn rollback(&mut self, tick: u64, state: &BallState) {
        if !self.engine.set_ball_state(state) {
            return;
        }
        self.predicted.insert(tick, state.clone());

        let replay: Vec<(u64, InputState)> = (tick + 1..=self.last_tick)
            .map(|t| (t, self.input_history.get(&t).copied().unwrap_or_default()))
            .collect();
        for (t, input) in replay {
            self.engine.step(&[(self.player_id.clone(), input)]);
            if let Some(replayed) = self.engine.ball_state(&self.player_id) {
                self.predicted.insert(t, replayed);
            }
        }
    }

    fn prune(&mut self) {
        let oldest = self.last_tick.saturating_sub(self.history_ticks - 1);
        self.input_history = self.input_history.split_off(&oldest);
        self.predicted = self.predicted.split_off(&oldest);
    }

    fn clear_history(&mut self) {
        self.input_history.clear();
        self.predicted.clear();
    }

    pub fn ball_state(&self) -> Option<BallState> {
        self.engine.ball_state(&self.player_id)
    }

    pub fn input_at(&self, tick: u64) -> Option<&InputState> {
        self.input_history.get(&tick)
    }

    pub fn predicted_at(&self, tick: u64) -> Option<&BallState> {
        self.predicted.get(&tick)
    }

    pub fn history_len(&self) -> usize {
        self.input_history.len()
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }
}
