//! Domain events emitted by the state machine.

use serde::{Deserialize, Serialize};

use crate::game::{PIECES_PER_PLAYER, Player, Position};
use crate::node::{LogIndex, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Created {
        code: String,
    },
    PlayerJoined {
        code: String,
        player: Player,
    },
    Started {
        code: String,
        current_turn: Player,
    },
    DiceRolled {
        code: String,
        player_id: String,
        roll: u8,
        /// Set when the roll forfeits the turn.
        next_turn: Option<Player>,
    },
    PieceMoved {
        code: String,
        player_id: String,
        piece_index: usize,
        new_position: Position,
        positions: [Position; PIECES_PER_PLAYER],
        next_player: Option<Player>,
        just_won: bool,
        /// True when the move captured something and other players' boards changed.
        skip: bool,
    },
    PieceCaptured {
        code: String,
        player_id: String,
        piece_index: usize,
        captured_by: String,
    },
    PlayerStateChanged {
        code: String,
        player_id: String,
        online: bool,
    },
}

impl GameEvent {
    /// Channel name the broadcaster publishes this event under.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Created { .. } => "game:created",
            GameEvent::PlayerJoined { .. } => "game:player_joined",
            GameEvent::Started { .. } => "game:started",
            GameEvent::DiceRolled { .. } => "game:dice_rolled",
            GameEvent::PieceMoved { .. } => "game:piece_moved",
            GameEvent::PieceCaptured { .. } => "game:piece_captured",
            GameEvent::PlayerStateChanged { .. } => "game:player_state_changed",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            GameEvent::Created { code }
            | GameEvent::PlayerJoined { code, .. }
            | GameEvent::Started { code, .. }
            | GameEvent::DiceRolled { code, .. }
            | GameEvent::PieceMoved { code, .. }
            | GameEvent::PieceCaptured { code, .. }
            | GameEvent::PlayerStateChanged { code, .. } => code,
        }
    }
}

/// An event tagged with the log entry that produced it.
///
/// `committed` is false for events the leader emitted from its optimistic
/// apply, before a majority had acknowledged the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub node_id: String,
    pub index: LogIndex,
    pub term: Term,
    pub committed: bool,
    pub event: GameEvent,
}
