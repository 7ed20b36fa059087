//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::{InputState, MatchPhase, Snapshot};
use crate::ids::{MatchId, PlayerId};
use crate::level::LevelDefinition;

/// Player role inside a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Picks level and score goal, starts the match
    Creator,
    Player,
}

impl Default for Role {
    fn default() -> Self {
        Self::Player
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Input sampled for one local tick
    PlayerState {
        tick: u64,
        #[serde(default)]
        input: InputState,
    },

    /// Client claims its ball reached the goal
    PlayerFinished,

    /// Toggle readiness; the creator's ready starts loading
    SetReady { ready: bool },

    /// Acknowledges `match_status` with phase IN_PROGRESS_QUEUED
    ClientReady,

    UpdateLevelSelection { level: String },

    UpdateScoreGoal { goal: u32 },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent to a player when admitted (and again when promoted to creator)
    #[serde(rename_all = "camelCase")]
    MatchJoined { role: Role, display_name: String },

    /// Full roster and selection state
    MatchStatus(MatchStatus),

    /// Level selection changed
    SetLevel { level: String },

    /// Geometry of the level about to be played
    #[serde(rename_all = "camelCase")]
    LoadLevel { level_definition: LevelDefinition },

    #[serde(rename_all = "camelCase")]
    Countdown { seconds_left: u32 },

    /// Ball positions right after spawning
    InitializeWorld { snapshot: Snapshot },

    StartMatch,

    /// Authoritative state for one tick
    Snapshot(Snapshot),

    #[serde(rename_all = "camelCase")]
    PlayerFinished {
        player_id: PlayerId,
        place: u32,
        points: u32,
    },

    #[serde(rename_all = "camelCase")]
    GameOver {
        winner_id: PlayerId,
        scores: BTreeMap<PlayerId, u32>,
    },

    /// Error message
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Payload of `match_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatus {
    pub match_id: MatchId,
    pub phase: MatchPhase,
    pub min_players: usize,
    pub level: Option<String>,
    pub score_goal: u32,
    pub players: Vec<PlayerInfo>,
    /// Players whose `client_ready` is still outstanding
    #[serde(default)]
    pub awaiting_ack: Vec<PlayerId>,
}

impl MatchStatus {
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| &p.id == id)
    }
}

/// Public player info (for roster)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub display_name: String,
    pub role: Role,
    pub ready: bool,
}
