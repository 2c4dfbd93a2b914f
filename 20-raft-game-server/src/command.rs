use serde::{Deserialize, Serialize};

use crate::game::{Player, Position};

/// Commands that flow through the replicated log.
///
/// Every argument the state machine needs is fixed before the entry is
/// appended, so applying the same command on any replica gives the same
/// result. Serialized as `{"command": "...", "args": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    CreateGame {
        code: String,
    },
    JoinGame {
        code: String,
        player: Player,
    },
    RollDice {
        code: String,
        player_id: String,
        roll: u8,
        next_turn: Option<String>,
    },
    MovePiece {
        code: String,
        player_id: String,
        piece_index: usize,
        new_position: Position,
    },
    StartGame {
        code: String,
    },
    SetPlayerState {
        code: String,
        player_id: String,
        online: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateGame { .. } => "create_game",
            Command::JoinGame { .. } => "join_game",
            Command::RollDice { .. } => "roll_dice",
            Command::MovePiece { .. } => "move_piece",
            Command::StartGame { .. } => "start_game",
            Command::SetPlayerState { .. } => "set_player_state",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Command::CreateGame { code }
            | Command::JoinGame { code, .. }
            | Command::RollDice { code, .. }
            | Command::MovePiece { code, .. }
            | Command::StartGame { code }
            | Command::SetPlayerState { code, .. } => code,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// What a client asks for. The gateway turns a request into a [`Command`] by
/// filling in the leader-chosen values (codes, player ids, dice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum GameRequest {
    CreateGame {
        code: Option<String>,
    },
    JoinGame {
        code: String,
        name: String,
    },
    RollDice {
        code: String,
        player_id: String,
    },
    MovePiece {
        code: String,
        player_id: String,
        piece_index: usize,
    },
    StartGame {
        code: String,
    },
    SetPlayerState {
        code: String,
        player_id: String,
        online: bool,
    },
}
