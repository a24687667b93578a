//! Wire protocol for race coordination

use serde::{Deserialize, Serialize};

use crate::core::race::{Participant, RaceState, RankingEntry};
use crate::snippet::Snippet;

/// Client-to-server message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create a private race room
    #[serde(rename = "create_room")]
    CreateRoom { name: Option<String> },

    /// Join an existing race room
    #[serde(rename = "join_room")]
    JoinRoom {
        room_id: String,
        name: Option<String>,
    },

    /// Leave the current race room
    #[serde(rename = "leave_room")]
    LeaveRoom,

    /// Report typing progress (count of correctly typed characters)
    #[serde(rename = "progress_update")]
    ProgressUpdate { progress: u32 },

    /// Enter the matchmaking queue
    #[serde(rename = "join_queue")]
    JoinQueue { name: Option<String> },

    /// Leave the matchmaking queue
    #[serde(rename = "leave_queue")]
    LeaveQueue,
}

/// Server-to-client message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Connection established
    #[serde(rename = "connected")]
    Connected {
        client_id: String,
        player_id: String,
        name: String,
        authenticated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_hint: Option<String>,
    },

    /// A room was created for this client
    #[serde(rename = "room_created")]
    RoomCreated { room_id: String },

    /// This client entered a room (by join, or by being matched)
    #[serde(rename = "room_joined")]
    RoomJoined {
        room_id: String,
        snippet: Snippet,
        players: Vec<PlayerInfo>,
        state: RaceState,
    },

    /// Another player entered the room
    #[serde(rename = "player_joined")]
    PlayerJoined { room_id: String, player: PlayerInfo },

    /// A player left the room
    #[serde(rename = "player_left")]
    PlayerLeft { room_id: String, player_id: String },

    /// Queued for matchmaking
    #[serde(rename = "queue_joined")]
    QueueJoined { position: usize },

    /// Pre-race countdown pulse
    #[serde(rename = "countdown_tick")]
    CountdownTick { room_id: String, seconds_left: u64 },

    /// Race went active; start_time is shared epoch milliseconds
    #[serde(rename = "game_start")]
    GameStart { room_id: String, start_time: i64 },

    /// Another player's progress moved
    #[serde(rename = "opponent_progress")]
    OpponentProgress {
        room_id: String,
        player_id: String,
        progress: u32,
    },

    /// Another player completed the snippet
    #[serde(rename = "player_finished_task")]
    PlayerFinishedTask {
        room_id: String,
        player_id: String,
        rank: usize,
    },

    /// This client completed the snippet
    #[serde(rename = "player_finished")]
    PlayerFinished {
        room_id: String,
        time_ms: u64,
        rank: usize,
    },

    /// A progress report was rejected; shared state is unchanged
    #[serde(rename = "validation_failed")]
    ValidationFailed { reason: String },

    /// Race over: the single final summary
    #[serde(rename = "game_complete")]
    GameComplete {
        room_id: String,
        rankings: Vec<RankingEntry>,
    },

    /// Error message
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Player information for rosters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub progress: u32,
    pub finished: bool,
}

impl From<&Participant> for PlayerInfo {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.player.id.clone(),
            name: p.player.name.clone(),
            progress: p.progress,
            finished: p.finished,
        }
    }
}
