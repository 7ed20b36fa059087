//! Match state machine and registry
//!
//! Each match is a tokio task that owns its roster, phase, and authoritative
//! [`Simulation`]. Sockets reach it only through [`MatchHandle`], so commands,
//! countdown timers, and ticks are processed one at a time.
//!
//! Phases only move forward: `WAITING` → `IN_PROGRESS_QUEUED` → `IN_PROGRESS`.
//! The creator's ready starts the queue; every player then acknowledges with
//! `client_ready` (or leaves), and only then is the level fetched, players
//! spawned, and the countdown run.

use std::collections::{BTreeMap, BTreeSet};
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::ids::{MatchId, PlayerId, SocketId};
use crate::level::{is_valid_level_id, LevelDefinition, LevelStore, LevelStoreError};
use crate::ws::protocol::{ClientMsg, MatchStatus, PlayerInfo, Role, ServerMsg};

use super::engine::Engine;
use super::physics::SpawnError;
use super::simulation::Simulation;

pub const MIN_SCORE_GOAL: u32 = 1;
pub const MAX_SCORE_GOAL: u32 = 10;
pub const DEFAULT_SCORE_GOAL: u32 = 3;

const COMMAND_BUFFER: usize = 256;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    /// Lobby: joining, level/score selection, readiness
    Waiting,
    /// Clients are loading; waiting for every `client_ready`
    InProgressQueued,
    /// Gameplay
    InProgress,
}

/// Per-match tunables shared by every match the registry creates
#[derive(Debug, Clone)]
pub struct MatchSettings {
    /// Roster size required before the creator may start
    pub min_players: usize,
    /// Seconds counted down between world initialization and gameplay
    pub countdown_secs: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            min_players: 1,
            countdown_secs: 3,
        }
    }
}

/// Outbound queue of one connected socket
pub type Outbound = mpsc::UnboundedSender<ServerMsg>;

/// Admission request carrying the verified ticket identity
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub player_id: PlayerId,
    pub display_name: String,
    pub role: Role,
    pub socket_id: SocketId,
    pub outbound: Outbound,
}

/// Everything a match task reacts to besides its own timers
#[derive(Debug)]
pub enum MatchCommand {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<(), MatchError>>,
    },
    Leave {
        player_id: PlayerId,
        socket_id: SocketId,
    },
    Client {
        player_id: PlayerId,
        socket_id: SocketId,
        msg: ClientMsg,
    },
    Status {
        reply: oneshot::Sender<MatchStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("match {0} is already in progress")]
    InProgress(MatchId),

    #[error("match is closed")]
    Closed,
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: MatchId,
    commands: mpsc::Sender<MatchCommand>,
    player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// True once the match task has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn join(&self, request: JoinRequest) -> Result<(), MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchCommand::Join { request, reply }).await?;
        rx.await.map_err(|_| MatchError::Closed)?
    }

    pub async fn leave(&self, player_id: PlayerId, socket_id: SocketId) -> Result<(), MatchError> {
        self.send(MatchCommand::Leave {
            player_id,
            socket_id,
        })
        .await
    }

    pub async fn client_message(
        &self,
        player_id: PlayerId,
        socket_id: SocketId,
        msg: ClientMsg,
    ) -> Result<(), MatchError> {
        self.send(MatchCommand::Client {
            player_id,
            socket_id,
            msg,
        })
        .await
    }

    /// Current status as the match would broadcast it
    pub async fn status(&self) -> Result<MatchStatus, MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchCommand::Status { reply }).await?;
        rx.await.map_err(|_| MatchError::Closed)
    }

    async fn send(&self, command: MatchCommand) -> Result<(), MatchError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MatchError::Closed)
    }

    fn same_match(&self, other: &MatchHandle) -> bool {
        Arc::ptr_eq(&self.player_count, &other.player_count)
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<MatchId, MatchHandle>,
    settings: MatchSettings,
    level_store: Arc<dyn LevelStore>,
}

impl MatchRegistry {
    pub fn new(settings: MatchSettings, level_store: Arc<dyn LevelStore>) -> Self {
        Self {
            matches: DashMap::new(),
            settings,
            level_store,
        }
    }

    /// Return the live match for `id`, creating it (and its task) if there is
    /// none or the previous one has shut down.
    pub fn get_or_create(self: &Arc<Self>, id: &MatchId) -> MatchHandle {
        let mut entry = self
            .matches
            .entry(id.clone())
            .or_insert_with(|| self.spawn_match(id.clone()));
        if entry.is_closed() {
            *entry = self.spawn_match(id.clone());
        }
        entry.value().clone()
    }

    /// Drop the registry entry if it still points at `handle` and has no
    /// players. Returns whether an entry was removed.
    pub fn remove_if_empty(&self, handle: &MatchHandle) -> bool {
        self.matches
            .remove_if(&handle.id, |_, current| {
                current.same_match(handle) && current.player_count() == 0
            })
            .is_some()
    }

    /// Join a match, retrying once if it closed between lookup and join
    pub async fn join(
        self: &Arc<Self>,
        id: &MatchId,
        request: JoinRequest,
    ) -> Result<MatchHandle, MatchError> {
        let handle = self.get_or_create(id);
        match handle.join(request.clone()).await {
            Ok(()) => Ok(handle),
            Err(MatchError::Closed) => {
                debug!(match_id = %id, "Match closed during join, retrying");
                let handle = self.get_or_create(id);
                handle.join(request).await?;
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    fn spawn_match(self: &Arc<Self>, id: MatchId) -> MatchHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = MatchHandle {
            id: id.clone(),
            commands: commands_tx,
            player_count: Arc::new(AtomicUsize::new(0)),
        };

        let actor = MatchActor::new(
            id,
            self.settings.clone(),
            Arc::clone(&self.level_store),
            commands_rx,
            Arc::clone(&handle.player_count),
        );
        let registry = Arc::clone(self);
        let own_handle = handle.clone();
        tokio::spawn(async move {
            actor.run().await;
            registry.remove_if_empty(&own_handle);
        });

        handle
    }
}

type LevelFetch = Result<LevelDefinition, LevelStoreError>;

/// What the queued phase is doing once acks are in
enum Loading {
    Idle,
    Fetching(oneshot::Receiver<LevelFetch>),
    Countdown { seconds_left: u32, next_at: Instant },
    /// Last attempt failed; the creator may retry with `set_ready`
    Failed,
}

struct PlayerSession {
    display_name: String,
    role: Role,
    ready: bool,
    socket_id: SocketId,
    outbound: Outbound,
    joined_seq: u64,
}

/// The authoritative game match
struct MatchActor {
    id: MatchId,
    settings: MatchSettings,
    level_store: Arc<dyn LevelStore>,
    commands: mpsc::Receiver<MatchCommand>,
    player_count: Arc<AtomicUsize>,

    phase: MatchPhase,
    roster: BTreeMap<PlayerId, PlayerSession>,
    next_join_seq: u64,
    level_selection: Option<String>,
    score_goal: u32,
    awaiting_ack: BTreeSet<PlayerId>,
    loading: Loading,

    sim: Simulation,
    scores: BTreeMap<PlayerId, u32>,
    finishes_this_round: u32,
    game_over: bool,
    closing: bool,
}

impl MatchActor {
    fn new(
        id: MatchId,
        settings: MatchSettings,
        level_store: Arc<dyn LevelStore>,
        commands: mpsc::Receiver<MatchCommand>,
        player_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            settings,
            level_store,
            commands,
            player_count,
            phase: MatchPhase::Waiting,
            roster: BTreeMap::new(),
            next_join_seq: 0,
            level_selection: None,
            score_goal: DEFAULT_SCORE_GOAL,
            awaiting_ack: BTreeSet::new(),
            loading: Loading::Idle,
            sim: Simulation::new(Engine::new()),
            scores: BTreeMap::new(),
            finishes_this_round: 0,
            game_over: false,
            closing: false,
        }
    }

    async fn run(mut self) {
        info!(match_id = %self.id, "Match created");

        while !self.closing {
            let countdown_at = match &self.loading {
                Loading::Countdown { next_at, .. } => Some(*next_at),
                _ => None,
            };
            let tick_at = self.sim.deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                fetched = recv_level(&mut self.loading) => self.on_level_fetched(fetched),
                _ = sleep_until_opt(countdown_at) => self.advance_countdown(),
                _ = sleep_until_opt(tick_at) => self.run_tick(),
            }
        }

        self.sim.stop();
        info!(match_id = %self.id, "Match closed");
    }

    fn handle_command(&mut self, command: MatchCommand) {
        match command {
            MatchCommand::Join { request, reply } => {
                let result = self.admit(request);
                let _ = reply.send(result);
            }
            MatchCommand::Leave {
                player_id,
                socket_id,
            } => self.leave(&player_id, socket_id),
            MatchCommand::Client {
                player_id,
                socket_id,
                msg,
            } => {
                if self.is_bound(&player_id, socket_id) {
                    self.handle_client(&player_id, msg);
                } else {
                    debug!(match_id = %self.id, player_id = %player_id, "Message from stale socket dropped");
                }
            }
            MatchCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_client(&mut self, id: &PlayerId, msg: ClientMsg) {
        match msg {
            ClientMsg::PlayerState { tick, input } => {
                if self.phase == MatchPhase::InProgress {
                    self.sim.submit_input(id, input);
                } else {
                    debug!(match_id = %self.id, player_id = %id, tick, "Input outside gameplay ignored");
                }
            }
            ClientMsg::PlayerFinished => self.claim_finish(id),
            ClientMsg::SetReady { ready } => self.set_ready(id, ready),
            ClientMsg::ClientReady => self.acknowledge(id),
            ClientMsg::UpdateLevelSelection { level } => self.select_level(id, level),
            ClientMsg::UpdateScoreGoal { goal } => self.set_score_goal(id, goal),
        }
    }

    // --- roster ---

    fn admit(&mut self, request: JoinRequest) -> Result<(), MatchError> {
        let JoinRequest {
            player_id,
            display_name,
            role: ticket_role,
            socket_id,
            outbound,
        } = request;

        if let Some(session) = self.roster.get_mut(&player_id) {
            info!(match_id = %self.id, player_id = %player_id, socket_id = %socket_id, "Player reconnected, replacing socket");
            session.socket_id = socket_id;
            session.outbound = outbound;
            session.display_name = display_name;
            let joined = ServerMsg::MatchJoined {
                role: session.role,
                display_name: session.display_name.clone(),
            };
            self.send_to(&player_id, joined);
            self.send_to(&player_id, ServerMsg::MatchStatus(self.status()));
            self.resend_world(&player_id);
            return Ok(());
        }

        if self.phase != MatchPhase::Waiting {
            warn!(match_id = %self.id, player_id = %player_id, phase = ?self.phase, "Join rejected, match already started");
            return Err(MatchError::InProgress(self.id.clone()));
        }

        // Exactly one creator while the roster is non-empty
        let role = if self.creator_id().is_none() {
            Role::Creator
        } else {
            Role::Player
        };
        if role != ticket_role {
            debug!(match_id = %self.id, player_id = %player_id, ticket_role = ?ticket_role, role = ?role, "Role adjusted on join");
        }

        self.roster.insert(
            player_id.clone(),
            PlayerSession {
                display_name: display_name.clone(),
                role,
                ready: false,
                socket_id,
                outbound,
                joined_seq: self.next_join_seq,
            },
        );
        self.next_join_seq += 1;
        self.player_count.store(self.roster.len(), Ordering::Relaxed);

        info!(
            match_id = %self.id,
            player_id = %player_id,
            role = ?role,
            player_count = self.roster.len(),
            "Player joined match"
        );

        self.send_to(&player_id, ServerMsg::MatchJoined { role, display_name });
        self.broadcast_status();
        Ok(())
    }

    fn leave(&mut self, id: &PlayerId, socket_id: SocketId) {
        if !self.is_bound(id, socket_id) {
            debug!(match_id = %self.id, player_id = %id, "Leave from replaced socket ignored");
            return;
        }

        self.detach_player(id);
        if self.closing {
            return;
        }

        self.broadcast_status();
        match self.phase {
            MatchPhase::Waiting => {}
            MatchPhase::InProgressQueued => self.maybe_begin_load(),
            MatchPhase::InProgress => self.check_round_complete(),
        }
    }

    /// Remove a player from every match structure. Marks the match for
    /// teardown when it empties and hands the creator role on otherwise.
    fn detach_player(&mut self, id: &PlayerId) {
        let Some(session) = self.roster.remove(id) else {
            return;
        };
        self.player_count.store(self.roster.len(), Ordering::Relaxed);
        self.awaiting_ack.remove(id);
        self.scores.remove(id);
        self.sim.remove_player(id);
        self.sim.engine_mut().remove_player(id);

        info!(
            match_id = %self.id,
            player_id = %id,
            player_count = self.roster.len(),
            "Player left match"
        );

        if self.roster.is_empty() {
            self.closing = true;
            return;
        }
        if session.role == Role::Creator {
            self.promote_creator();
        }
    }

    fn promote_creator(&mut self) {
        let Some((id, session)) = self
            .roster
            .iter_mut()
            .min_by_key(|(_, session)| session.joined_seq)
        else {
            return;
        };
        session.role = Role::Creator;
        let joined = ServerMsg::MatchJoined {
            role: Role::Creator,
            display_name: session.display_name.clone(),
        };
        let _ = session.outbound.send(joined);
        info!(match_id = %self.id, player_id = %id, "Creator role handed over");
    }

    fn creator_id(&self) -> Option<&PlayerId> {
        self.roster
            .iter()
            .find(|(_, session)| session.role == Role::Creator)
            .map(|(id, _)| id)
    }

    fn is_creator(&self, id: &PlayerId) -> bool {
        self.roster
            .get(id)
            .map(|session| session.role == Role::Creator)
            .unwrap_or(false)
    }

    fn is_bound(&self, id: &PlayerId, socket_id: SocketId) -> bool {
        self.roster
            .get(id)
            .map(|session| session.socket_id == socket_id)
            .unwrap_or(false)
    }

    fn join_order(&self) -> Vec<PlayerId> {
        let mut ids: Vec<(&PlayerId, u64)> = self
            .roster
            .iter()
            .map(|(id, session)| (id, session.joined_seq))
            .collect();
        ids.sort_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    // --- lobby ---

    fn set_ready(&mut self, id: &PlayerId, ready: bool) {
        let is_creator = self.is_creator(id);
        match self.phase {
            MatchPhase::Waiting => {
                if let Some(session) = self.roster.get_mut(id) {
                    session.ready = ready;
                }
                if is_creator && ready {
                    if self.roster.len() < self.settings.min_players {
                        warn!(
                            match_id = %self.id,
                            players = self.roster.len(),
                            min_players = self.settings.min_players,
                            "Start refused, not enough players"
                        );
                        self.send_to(
                            id,
                            ServerMsg::error("not_enough_players", "Waiting for more players"),
                        );
                        self.broadcast_status();
                        return;
                    }
                    self.queue_match();
                    return;
                }
                self.broadcast_status();
            }
            MatchPhase::InProgressQueued
                if is_creator && ready && matches!(self.loading, Loading::Failed) =>
            {
                info!(match_id = %self.id, "Retrying level load");
                self.begin_load();
            }
            _ => {
                debug!(match_id = %self.id, player_id = %id, phase = ?self.phase, "Ready toggle ignored");
            }
        }
    }

    fn queue_match(&mut self) {
        self.phase = MatchPhase::InProgressQueued;
        self.awaiting_ack = self.roster.keys().cloned().collect();
        self.loading = Loading::Idle;
        info!(match_id = %self.id, awaiting = self.awaiting_ack.len(), "Match queued, waiting for clients to load");
        self.broadcast_status();
    }

    fn acknowledge(&mut self, id: &PlayerId) {
        if self.phase != MatchPhase::InProgressQueued {
            debug!(match_id = %self.id, player_id = %id, "Ack outside queued phase ignored");
            return;
        }
        if self.awaiting_ack.remove(id) {
            debug!(match_id = %self.id, player_id = %id, remaining = self.awaiting_ack.len(), "Client ready");
            self.broadcast_status();
            self.maybe_begin_load();
        }
    }

    /// Level selection is open in the lobby, and again after a failed load
    fn selection_open(&self) -> bool {
        self.phase == MatchPhase::Waiting
            || (self.phase == MatchPhase::InProgressQueued
                && matches!(self.loading, Loading::Failed))
    }

    fn select_level(&mut self, id: &PlayerId, level: String) {
        if !self.is_creator(id) || !self.selection_open() {
            warn!(match_id = %self.id, player_id = %id, "Level selection rejected");
            return;
        }
        if !is_valid_level_id(&level) {
            warn!(match_id = %self.id, player_id = %id, level = ?level, "Invalid level id rejected");
            self.send_to(
                id,
                ServerMsg::error("invalid_level", "Level ids may only contain letters, digits, '-' and '_'"),
            );
            return;
        }
        info!(match_id = %self.id, level = %level, "Level selected");
        self.level_selection = Some(level.clone());
        self.broadcast(&ServerMsg::SetLevel { level });
        self.broadcast_status();
    }

    fn set_score_goal(&mut self, id: &PlayerId, goal: u32) {
        if !self.is_creator(id) || self.phase != MatchPhase::Waiting {
            warn!(match_id = %self.id, player_id = %id, "Score goal update rejected");
            return;
        }
        if !(MIN_SCORE_GOAL..=MAX_SCORE_GOAL).contains(&goal) {
            warn!(match_id = %self.id, goal, "Score goal out of range");
            return;
        }
        self.score_goal = goal;
        self.broadcast_status();
    }

    // --- loading and countdown ---

    fn maybe_begin_load(&mut self) {
        if self.phase == MatchPhase::InProgressQueued
            && self.awaiting_ack.is_empty()
            && matches!(self.loading, Loading::Idle)
        {
            self.begin_load();
        }
    }

    fn begin_load(&mut self) {
        let Some(level_id) = self.level_selection.clone() else {
            error!(match_id = %self.id, "No level selected, load aborted");
            self.fail_load("No level selected".to_string());
            return;
        };

        info!(match_id = %self.id, level_id = %level_id, "Fetching level");
        let store = Arc::clone(&self.level_store);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(store.fetch_level(&level_id).await);
        });
        self.loading = Loading::Fetching(rx);
    }

    fn fail_load(&mut self, reason: String) {
        self.loading = Loading::Failed;
        self.broadcast(&ServerMsg::error("level_load_failed", reason));
    }

    fn on_level_fetched(&mut self, fetched: Result<LevelFetch, oneshot::error::RecvError>) {
        self.loading = Loading::Idle;

        let level = match fetched {
            Ok(Ok(level)) => level,
            Ok(Err(e)) => {
                error!(match_id = %self.id, error = %e, "Level fetch failed");
                self.fail_load(e.to_string());
                return;
            }
            Err(_) => {
                error!(match_id = %self.id, "Level fetch task dropped");
                self.fail_load("Level fetch interrupted".to_string());
                return;
            }
        };

        if let Err(e) = self.sim.engine_mut().load_level(level.clone()) {
            error!(match_id = %self.id, level_id = %level.id, error = %e, "Level rejected by engine");
            self.fail_load(e.to_string());
            return;
        }

        self.broadcast(&ServerMsg::LoadLevel {
            level_definition: level,
        });
        self.spawn_roster();
        if self.closing {
            return;
        }
        self.broadcast(&ServerMsg::InitializeWorld {
            snapshot: self.sim.engine().snapshot(),
        });

        let seconds_left = self.settings.countdown_secs;
        self.broadcast(&ServerMsg::Countdown { seconds_left });
        if seconds_left == 0 {
            self.begin_gameplay();
        } else {
            self.loading = Loading::Countdown {
                seconds_left,
                next_at: Instant::now() + Duration::from_secs(1),
            };
        }
    }

    /// Place every player on a spawn point, in join order. Players left
    /// without a spawn point are told why and removed.
    fn spawn_roster(&mut self) {
        for id in self.join_order() {
            match self.sim.engine_mut().spawn_player(&id) {
                Ok(at) => {
                    debug!(match_id = %self.id, player_id = %id, x = at.x, y = at.y, "Player spawned");
                }
                Err(SpawnError::AlreadySpawned) => {}
                Err(SpawnError::NoFreeSpawnPoint) => {
                    warn!(match_id = %self.id, player_id = %id, "No free spawn point, removing player");
                    self.send_to(
                        &id,
                        ServerMsg::error("no_spawn_point", "This level has no room for another player"),
                    );
                    self.detach_player(&id);
                    if self.closing {
                        return;
                    }
                    self.broadcast_status();
                }
            }
        }
    }

    fn advance_countdown(&mut self) {
        let Loading::Countdown {
            seconds_left,
            next_at,
        } = &mut self.loading
        else {
            return;
        };
        *seconds_left = seconds_left.saturating_sub(1);
        *next_at += Duration::from_secs(1);
        let left = *seconds_left;

        self.broadcast(&ServerMsg::Countdown { seconds_left: left });
        if left == 0 {
            self.loading = Loading::Idle;
            self.begin_gameplay();
        }
    }

    fn begin_gameplay(&mut self) {
        self.phase = MatchPhase::InProgress;
        self.finishes_this_round = 0;
        info!(match_id = %self.id, players = self.roster.len(), "Match in progress");
        self.broadcast_status();
        self.broadcast(&ServerMsg::StartMatch);
        self.sim.start(Instant::now());
    }

    // --- gameplay ---

    fn run_tick(&mut self) {
        let Some(outcome) = self.sim.poll(Instant::now()) else {
            return;
        };
        self.broadcast(&ServerMsg::Snapshot(outcome.snapshot));
        if outcome.finished.is_empty() {
            return;
        }
        for id in &outcome.finished {
            self.record_finish(id);
        }
        self.settle_finishes(&outcome.finished);
    }

    /// A client says it finished; count it only if the authoritative ball
    /// agrees and the finish was not already recorded.
    fn claim_finish(&mut self, id: &PlayerId) {
        if self.phase != MatchPhase::InProgress || self.game_over {
            return;
        }
        let engine = self.sim.engine();
        if engine.has_finished(id) {
            return;
        }
        if !engine.is_in_goal(id) {
            warn!(match_id = %self.id, player_id = %id, "Finish claim rejected, ball not in goal");
            return;
        }
        if self.sim.engine_mut().mark_finished(id) {
            self.record_finish(id);
            self.settle_finishes(std::slice::from_ref(id));
        }
    }

    fn record_finish(&mut self, id: &PlayerId) {
        if self.game_over || !self.roster.contains_key(id) {
            return;
        }

        self.finishes_this_round += 1;
        let place = self.finishes_this_round;
        let points = (self.roster.len() as u32 + 1).saturating_sub(place).max(1);
        let total = {
            let score = self.scores.entry(id.clone()).or_insert(0);
            *score += points;
            *score
        };

        info!(match_id = %self.id, player_id = %id, place, points, total, "Player finished");
        self.broadcast(&ServerMsg::PlayerFinished {
            player_id: id.clone(),
            place,
            points,
        });
    }

    /// After a batch of finishes has been scored: end the game if anyone in
    /// the batch reached the score goal, otherwise see if the round is over.
    fn settle_finishes(&mut self, batch: &[PlayerId]) {
        if self.game_over {
            return;
        }

        // highest total wins; ties go to the earlier finisher
        let winner = batch
            .iter()
            .rev()
            .filter_map(|id| self.scores.get(id).map(|total| (id, *total)))
            .filter(|(_, total)| *total >= self.score_goal)
            .max_by_key(|(_, total)| *total)
            .map(|(id, _)| id.clone());

        match winner {
            Some(winner_id) => {
                self.game_over = true;
                self.sim.stop();
                info!(match_id = %self.id, winner = %winner_id, "Game over");
                self.broadcast(&ServerMsg::GameOver {
                    winner_id,
                    scores: self.scores.clone(),
                });
            }
            None => self.check_round_complete(),
        }
    }

    /// Once every spawned player has finished, replay the same level
    fn check_round_complete(&mut self) {
        if self.phase != MatchPhase::InProgress || self.game_over {
            return;
        }
        let engine = self.sim.engine();
        let spawned: Vec<&PlayerId> = self
            .roster
            .keys()
            .filter(|id| engine.has_ball(id))
            .collect();
        if spawned.is_empty() || !spawned.iter().all(|id| engine.has_finished(id)) {
            return;
        }

        let Some(level) = engine.level().cloned() else {
            return;
        };
        info!(match_id = %self.id, level_id = %level.id, "Round complete, reloading level");
        if let Err(e) = self.sim.engine_mut().load_level(level) {
            error!(match_id = %self.id, error = %e, "Level reload failed");
            return;
        }
        self.finishes_this_round = 0;
        self.spawn_roster();
        if self.closing {
            return;
        }
        self.broadcast(&ServerMsg::InitializeWorld {
            snapshot: self.sim.engine().snapshot(),
        });
    }

    /// Catch a reconnecting player up on the world they missed
    fn resend_world(&self, id: &PlayerId) {
        if self.phase == MatchPhase::Waiting {
            return;
        }
        let engine = self.sim.engine();
        if let Some(level) = engine.level() {
            self.send_to(
                id,
                ServerMsg::LoadLevel {
                    level_definition: level.clone(),
                },
            );
            self.send_to(
                id,
                ServerMsg::InitializeWorld {
                    snapshot: engine.snapshot(),
                },
            );
        }
    }

    // --- outbound ---

    fn status(&self) -> MatchStatus {
        MatchStatus {
            match_id: self.id.clone(),
            phase: self.phase,
            min_players: self.settings.min_players,
            level: self.level_selection.clone(),
            score_goal: self.score_goal,
            players: self
                .join_order()
                .into_iter()
                .filter_map(|id| {
                    let session = self.roster.get(&id)?;
                    Some(PlayerInfo {
                        display_name: session.display_name.clone(),
                        role: session.role,
                        ready: session.ready,
                        id,
                    })
                })
                .collect(),
            awaiting_ack: self.awaiting_ack.iter().cloned().collect(),
        }
    }

    fn broadcast_status(&self) {
        self.broadcast(&ServerMsg::MatchStatus(self.status()));
    }

    fn broadcast(&self, msg: &ServerMsg) {
        for session in self.roster.values() {
            let _ = session.outbound.send(msg.clone());
        }
    }

    fn send_to(&self, id: &PlayerId, msg: ServerMsg) {
        if let Some(session) = self.roster.get(id) {
            let _ = session.outbound.send(msg);
        }
    }
}

async fn recv_level(loading: &mut Loading) -> Result<LevelFetch, oneshot::error::RecvError> {
    match loading {
        Loading::Fetching(rx) => rx.await,
        _ => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
