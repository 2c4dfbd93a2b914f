//! Entry point for state-changing game commands.
//!
//! Only the leader accepts commands. It fixes every nondeterministic value
//! (game code, player id, dice roll) up front so the logged [`Command`]
//! replays identically on followers.

use nanoid::nanoid;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::command::{Command, GameRequest};
use crate::error::{ConsensusError, SubmitError};
use crate::events::GameEvent;
use crate::game::{GameError, GameManager, Player};
use crate::node::{LogIndex, RaftNode, Term};

const CODE_ALPHABET: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];
const CODE_LENGTH: usize = 6;

/// Result of a submission the leader accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub index: LogIndex,
    pub term: Term,
    pub command: Command,
    /// Events from the leader's local apply.
    pub events: Vec<GameEvent>,
}

/// Resolves, applies and logs one request on the leader.
///
/// The returned receipt means the entry is in the leader's log; callers that
/// need durability wait for it to commit (see [`crate::runtime::NodeHandle::submit`]).
pub fn submit<R>(
    node: &mut RaftNode,
    request: GameRequest,
    rng: &mut R,
) -> Result<SubmitReceipt, SubmitError>
where
    R: Rng,
{
    if !node.is_leader() {
        return Err(ConsensusError::NotLeader {
            leader: node.leader_id().map(str::to_string),
        }
        .into());
    }

    // Resolve against state that already reflects every logged entry.
    node.ensure_caught_up()?;
    let command = resolve(node.games(), request, rng)?;
    let (index, events) = node.propose(&command)?;
    info!(
        node = %node.id(),
        index,
        term = node.term(),
        command = command.name(),
        code = command.code(),
        "command accepted"
    );
    Ok(SubmitReceipt {
        index,
        term: node.term(),
        command,
        events,
    })
}

/// Turns a request into a fully determined command.
///
/// Validation here is advisory; the authoritative checks run again when the
/// command is applied.
pub fn resolve<R>(
    games: &GameManager,
    request: GameRequest,
    rng: &mut R,
) -> Result<Command, GameError>
where
    R: Rng,
{
    match request {
        GameRequest::CreateGame { code } => {
            let code = match code {
                Some(code) => {
                    let code = code.trim().to_uppercase();
                    if games.contains(&code) {
                        return Err(GameError::GameExists);
                    }
                    code
                }
                None => fresh_code(games),
            };
            Ok(Command::CreateGame { code })
        }
        GameRequest::JoinGame { code, name } => {
            let game = games.game(&code).ok_or(GameError::GameNotFound)?;
            let mut id = nanoid!();
            while game.player(&id).is_some() {
                id = nanoid!();
            }
            Ok(Command::JoinGame {
                code,
                player: Player {
                    id,
                    name,
                    online: true,
                },
            })
        }
        GameRequest::StartGame { code } => Ok(Command::StartGame { code }),
        GameRequest::RollDice { code, player_id } => {
            let game = games.game(&code).ok_or(GameError::GameNotFound)?;
            let roll: u8 = rng.gen_range(1..=6);
            let forfeit = game.plan_roll(&player_id, roll)?;
            let next_turn = forfeit.map(|idx| game.players[idx].id.clone());
            Ok(Command::RollDice {
                code,
                player_id,
                roll,
                next_turn,
            })
        }
        GameRequest::MovePiece {
            code,
            player_id,
            piece_index,
        } => {
            let game = games.game(&code).ok_or(GameError::GameNotFound)?;
            let plan = game.plan_move(&player_id, piece_index)?;
            Ok(Command::MovePiece {
                code,
                player_id,
                piece_index,
                new_position: plan.new_position,
            })
        }
        GameRequest::SetPlayerState {
            code,
            player_id,
            online,
        } => Ok(Command::SetPlayerState {
            code,
            player_id,
            online,
        }),
    }
}

fn fresh_code(games: &GameManager) -> String {
    loop {
        let code = nanoid!(CODE_LENGTH, &CODE_ALPHABET);
        if !games.contains(&code) {
            return code;
        }
    }
}
