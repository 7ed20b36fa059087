//! Server match loop: fixed-rate stepping of the authoritative engine.
//!
//! The loop never sleeps for a fixed period. Each tick's deadline is computed
//! from the start instant (`start + n * interval`), and the caller waits only
//! for the time remaining until that deadline, so jitter in wakeups never
//! accumulates into drift. A late wakeup runs one tick and reports a zero
//! delay for the next, which catches up without skipping or doubling ticks.

use std::collections::BTreeMap;

use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::ids::PlayerId;
use crate::util::time::TICK_DURATION;

use super::engine::Engine;
use super::snapshot::Snapshot;
use super::InputState;

/// Result of one authoritative tick
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: Snapshot,
    /// Players who reached a goal during this tick
    pub finished: Vec<PlayerId>,
}

pub struct Simulation {
    engine: Engine,
    interval: Duration,
    running: bool,
    started_at: Instant,
    /// Ticks run since the last `start`
    ticks_since_start: u64,
    next_deadline: Instant,
    last_inputs: BTreeMap<PlayerId, InputState>,
    prev_jump_held: BTreeMap<PlayerId, bool>,
}

impl Simulation {
    pub fn new(engine: Engine) -> Self {
        Self::with_interval(engine, TICK_DURATION)
    }

    pub fn with_interval(engine: Engine, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            engine,
            interval,
            running: false,
            started_at: now,
            ticks_since_start: 0,
            next_deadline: now,
            last_inputs: BTreeMap::new(),
            prev_jump_held: BTreeMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Begin ticking; the first tick is due one interval after `now`.
    /// Calling this while running changes nothing.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        self.started_at = now;
        self.ticks_since_start = 0;
        self.next_deadline = now + self.interval;
        info!(tick = self.engine.tick(), "Match loop started");
    }

    /// Stop scheduling further ticks. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        info!(tick = self.engine.tick(), "Match loop stopped");
    }

    /// Overwrite the last known input for a player
    pub fn submit_input(&mut self, id: &PlayerId, input: InputState) {
        self.last_inputs.insert(id.clone(), input);
    }

    /// Forget a player's input state (on leave)
    pub fn remove_player(&mut self, id: &PlayerId) {
        self.last_inputs.remove(id);
        self.prev_jump_held.remove(id);
    }

    /// Next tick deadline, or `None` when stopped
    pub fn deadline(&self) -> Option<Instant> {
        self.running.then_some(self.next_deadline)
    }

    /// Time left until the next tick is due
    pub fn delay(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }

    /// Run at most one tick if its deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<TickOutcome> {
        if !self.running || now < self.next_deadline {
            return None;
        }

        let inputs = self.take_inputs();
        let finished = self.engine.step(&inputs);
        let snapshot = self.engine.snapshot();

        self.ticks_since_start += 1;
        match self.deadline_for(self.ticks_since_start + 1) {
            Some(deadline) => self.next_deadline = deadline,
            None => {
                warn!(ticks = self.ticks_since_start, "Tick schedule exhausted, stopping loop");
                self.running = false;
            }
        }

        if !finished.is_empty() {
            debug!(tick = snapshot.tick, count = finished.len(), "Goal reached");
        }
        Some(TickOutcome { snapshot, finished })
    }

    /// `started_at + interval * n`, or `None` if that is not representable
    fn deadline_for(&self, n: u64) -> Option<Instant> {
        let n = u32::try_from(n).ok()?;
        self.started_at.checked_add(self.interval.checked_mul(n)?)
    }

    /// Build this tick's input batch. A held key that was not held last tick
    /// counts as a press even if the client never sent one; an explicit press
    /// is consumed so it cannot fire twice.
    fn take_inputs(&mut self) -> Vec<(PlayerId, InputState)> {
        let mut batch = Vec::with_capacity(self.last_inputs.len());
        for (id, input) in self.last_inputs.iter_mut() {
            let was_held = self.prev_jump_held.get(id).copied().unwrap_or(false);
            let mut effective = *input;
            effective.jump_pressed = input.jump_pressed || (input.jump_held && !was_held);

            self.prev_jump_held.insert(id.clone(), input.jump_held);
            input.jump_pressed = false;
            batch.push((id.clone(), effective));
        }
        batch
    }
}
