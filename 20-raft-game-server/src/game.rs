//! The replicated state machine: game lifecycle and board rules.
//!
//! Every node owns one [`GameManager`]. Committed log entries are decoded into
//! [`Command`]s and applied here in log order, so two managers that applied the
//! same prefix of the log hold identical games. Nothing in this module touches
//! the network or the clock; dice rolls, game codes and player ids are chosen
//! by the gateway on the leader and arrive here as plain command arguments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::Command;
use crate::events::GameEvent;

/// Track index of a piece. `-1` is home, `0..40` the main track, `40..44` the finish lane.
pub type Position = i8;

pub const HOME: Position = -1;
pub const TRACK_LENGTH: Position = 40;
pub const FINISH_LANE_LENGTH: Position = 4;
pub const LAST_FINISH_INDEX: Position = TRACK_LENGTH + FINISH_LANE_LENGTH - 1;
pub const PIECES_PER_PLAYER: usize = 4;
pub const MAX_PLAYERS: usize = 4;

/// Distance between the entry squares of consecutive players.
const START_SPACING: Position = 10;

/// Local validation failures. These are returned to the caller and never enter the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Game not found.")]
    GameNotFound,
    #[error("Game already exists.")]
    GameExists,
    #[error("Game is full.")]
    GameFull,
    #[error("Player name already taken.")]
    NameTaken,
    #[error("Game has already started.")]
    AlreadyStarted,
    #[error("Game has not started.")]
    NotStarted,
    #[error("Not enough players.")]
    NoPlayers,
    #[error("Game is over.")]
    GameOver,
    #[error("Player not found.")]
    PlayerNotFound,
    #[error("Dice already rolled.")]
    DiceAlreadyRolled,
    #[error("Not your turn.")]
    NotYourTurn,
    #[error("No dice rolled.")]
    NoDiceRolled,
    #[error("Invalid dice roll.")]
    InvalidRoll,
    #[error("Invalid piece index.")]
    InvalidPieceIndex,
    #[error("Need 6 to move out of home.")]
    NeedSixToLeaveHome,
    #[error("Roll too large to enter finish lane.")]
    FinishLaneOvershoot,
    #[error("Roll too large to move in finish lane.")]
    FinishLaneOverrun,
    #[error("Position already taken.")]
    PositionTaken,
    /// A logged command disagrees with what this replica computes from its own state.
    #[error("command does not match local game state: {0}")]
    Diverged(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub online: bool,
}

/// Computes where a piece lands, or why it cannot move.
///
/// Pure function of its arguments; board occupancy is checked separately by
/// [`Game::plan_move`]. Rolls outside `1..=6` are rejected.
pub fn next_position(
    current: Position,
    roll: u8,
    start_offset: Position,
) -> Result<Position, GameError> {
    if !(1..=6).contains(&roll) {
        return Err(GameError::InvalidRoll);
    }
    let roll = roll as Position;
    if current == HOME {
        return if roll == 6 {
            Ok(start_offset)
        } else {
            Err(GameError::NeedSixToLeaveHome)
        };
    }

    if (0..TRACK_LENGTH).contains(&current) {
        let steps_from_start = (current - start_offset).rem_euclid(TRACK_LENGTH);
        let total = steps_from_start + roll;
        if total < TRACK_LENGTH {
            return Ok((current + roll) % TRACK_LENGTH);
        }
        let lane_slot = total - TRACK_LENGTH;
        if lane_slot >= FINISH_LANE_LENGTH {
            return Err(GameError::FinishLaneOvershoot);
        }
        return Ok(TRACK_LENGTH + lane_slot);
    }

    if (TRACK_LENGTH..=LAST_FINISH_INDEX).contains(&current) {
        let target = current + roll;
        if target > LAST_FINISH_INDEX {
            return Err(GameError::FinishLaneOverrun);
        }
        return Ok(target);
    }

    Err(GameError::Diverged(format!("position {current} is off the board")))
}

/// A piece that gets sent home by a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub player_id: String,
    pub piece_index: usize,
}

/// Outcome of a validated move, computed before anything is mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub roll: u8,
    pub new_position: Position,
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub code: String,
    /// Join order, which is also turn order.
    pub players: Vec<Player>,
    pub started: bool,
    pub current_turn: usize,
    pub pending_roll: Option<u8>,
    pub positions: BTreeMap<String, [Position; PIECES_PER_PLAYER]>,
    pub start_offset: BTreeMap<String, Position>,
    pub winner: Option<String>,
}

impl Game {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            players: Vec::new(),
            started: false,
            current_turn: 0,
            pending_roll: None,
            positions: BTreeMap::new(),
            start_offset: BTreeMap::new(),
            winner: None,
        }
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_turn)
    }

    /// Index of the next online player after the current one.
    ///
    /// Falls back to plain rotation when nobody is online.
    pub fn next_turn_index(&self) -> usize {
        let count = self.players.len();
        if count == 0 {
            return 0;
        }
        (1..=count)
            .map(|step| (self.current_turn + step) % count)
            .find(|&idx| self.players[idx].online)
            .unwrap_or((self.current_turn + 1) % count)
    }

    pub fn has_won(&self, player_id: &str) -> bool {
        self.positions
            .get(player_id)
            .is_some_and(|pieces| pieces.iter().all(|&pos| pos >= TRACK_LENGTH))
    }

    fn ensure_turn(&self, player_id: &str) -> Result<(), GameError> {
        if !self.started {
            return Err(GameError::NotStarted);
        }
        if self.winner.is_some() {
            return Err(GameError::GameOver);
        }
        match self.current_player() {
            Some(player) if player.id == player_id => Ok(()),
            _ => Err(GameError::NotYourTurn),
        }
    }

    /// Validates a roll request and reports whose turn it becomes if the roll
    /// forfeits the turn (not a 6 while every piece is still at home).
    pub fn plan_roll(&self, player_id: &str, roll: u8) -> Result<Option<usize>, GameError> {
        if !(1..=6).contains(&roll) {
            return Err(GameError::InvalidRoll);
        }
        if self.pending_roll.is_some() {
            return Err(GameError::DiceAlreadyRolled);
        }
        self.ensure_turn(player_id)?;

        let all_home = self
            .positions
            .get(player_id)
            .is_some_and(|pieces| pieces.iter().all(|&pos| pos == HOME));
        if roll != 6 && all_home {
            Ok(Some(self.next_turn_index()))
        } else {
            Ok(None)
        }
    }

    /// Validates a move against the pending roll and current occupancy.
    pub fn plan_move(&self, player_id: &str, piece_index: usize) -> Result<MovePlan, GameError> {
        let roll = self.pending_roll.ok_or(GameError::NoDiceRolled)?;
        self.ensure_turn(player_id)?;
        if piece_index >= PIECES_PER_PLAYER {
            return Err(GameError::InvalidPieceIndex);
        }

        let pieces = self
            .positions
            .get(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        let start = *self
            .start_offset
            .get(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        let new_position = next_position(pieces[piece_index], roll, start)?;

        let blocked_by_own = pieces
            .iter()
            .enumerate()
            .any(|(idx, &pos)| idx != piece_index && pos == new_position);
        if blocked_by_own {
            return Err(GameError::PositionTaken);
        }

        let mut captures = Vec::new();
        if new_position < TRACK_LENGTH {
            for (other, other_pieces) in &self.positions {
                if other == player_id {
                    continue;
                }
                for (idx, &pos) in other_pieces.iter().enumerate() {
                    if pos == new_position {
                        captures.push(Capture {
                            player_id: other.clone(),
                            piece_index: idx,
                        });
                    }
                }
            }
        }

        Ok(MovePlan {
            roll,
            new_position,
            captures,
        })
    }
}

/// Owns every game on this node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameManager {
    games: BTreeMap<String, Game>,
}

impl GameManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self, code: &str) -> Option<&Game> {
        self.games.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.games.contains_key(code)
    }

    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.games.values()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    fn game_mut(&mut self, code: &str) -> Result<&mut Game, GameError> {
        self.games.get_mut(code).ok_or(GameError::GameNotFound)
    }

    /// Applies one command. On error the manager is left untouched.
    pub fn apply(&mut self, command: &Command) -> Result<Vec<GameEvent>, GameError> {
        match command {
            Command::CreateGame { code } => self.create_game(code),
            Command::JoinGame { code, player } => self.join_game(code, player),
            Command::StartGame { code } => self.start_game(code),
            Command::RollDice {
                code,
                player_id,
                roll,
                next_turn,
            } => self.roll_dice(code, player_id, *roll, next_turn.as_deref()),
            Command::MovePiece {
                code,
                player_id,
                piece_index,
                new_position,
            } => self.move_piece(code, player_id, *piece_index, *new_position),
            Command::SetPlayerState {
                code,
                player_id,
                online,
            } => self.set_player_state(code, player_id, *online),
        }
    }

    fn create_game(&mut self, code: &str) -> Result<Vec<GameEvent>, GameError> {
        if self.games.contains_key(code) {
            return Err(GameError::GameExists);
        }
        self.games.insert(code.to_string(), Game::new(code));
        Ok(vec![GameEvent::Created {
            code: code.to_string(),
        }])
    }

    fn join_game(&mut self, code: &str, player: &Player) -> Result<Vec<GameEvent>, GameError> {
        let game = self.game_mut(code)?;
        if game.players.len() >= MAX_PLAYERS {
            return Err(GameError::GameFull);
        }
        if game.players.iter().any(|p| p.name == player.name) {
            return Err(GameError::NameTaken);
        }
        if game.started {
            return Err(GameError::AlreadyStarted);
        }
        if game.player(&player.id).is_some() {
            return Err(GameError::Diverged(format!(
                "player id {} already in game",
                player.id
            )));
        }

        game.players.push(player.clone());
        game.positions
            .entry(player.id.clone())
            .or_insert([HOME; PIECES_PER_PLAYER]);
        for (idx, p) in game.players.iter().enumerate() {
            game.start_offset
                .insert(p.id.clone(), idx as Position * START_SPACING);
        }

        Ok(vec![GameEvent::PlayerJoined {
            code: code.to_string(),
            player: player.clone(),
        }])
    }

    fn start_game(&mut self, code: &str) -> Result<Vec<GameEvent>, GameError> {
        let game = self.game_mut(code)?;
        if game.started {
            return Err(GameError::AlreadyStarted);
        }
        let first = game.players.first().cloned().ok_or(GameError::NoPlayers)?;
        game.started = true;
        game.current_turn = 0;
        Ok(vec![GameEvent::Started {
            code: code.to_string(),
            current_turn: first,
        }])
    }

    fn roll_dice(
        &mut self,
        code: &str,
        player_id: &str,
        roll: u8,
        next_turn: Option<&str>,
    ) -> Result<Vec<GameEvent>, GameError> {
        let game = self.game_mut(code)?;
        let forfeit = game.plan_roll(player_id, roll)?;
        let expected = forfeit.map(|idx| game.players[idx].id.as_str());
        if expected != next_turn {
            return Err(GameError::Diverged(format!(
                "roll {roll} hands the turn to {expected:?}, log says {next_turn:?}"
            )));
        }

        let next_player = match forfeit {
            Some(idx) => {
                game.pending_roll = None;
                game.current_turn = idx;
                Some(game.players[idx].clone())
            }
            None => {
                game.pending_roll = Some(roll);
                None
            }
        };

        Ok(vec![GameEvent::DiceRolled {
            code: code.to_string(),
            player_id: player_id.to_string(),
            roll,
            next_turn: next_player,
        }])
    }

    fn move_piece(
        &mut self,
        code: &str,
        player_id: &str,
        piece_index: usize,
        new_position: Position,
    ) -> Result<Vec<GameEvent>, GameError> {
        let game = self.game_mut(code)?;
        let plan = game.plan_move(player_id, piece_index)?;
        if plan.new_position != new_position {
            return Err(GameError::Diverged(format!(
                "roll {} moves piece {piece_index} to {}, log says {new_position}",
                plan.roll, plan.new_position
            )));
        }

        for capture in &plan.captures {
            if let Some(pieces) = game.positions.get_mut(&capture.player_id) {
                pieces[capture.piece_index] = HOME;
            }
        }
        let positions = match game.positions.get_mut(player_id) {
            Some(pieces) => {
                pieces[piece_index] = new_position;
                *pieces
            }
            None => return Err(GameError::PlayerNotFound),
        };
        game.pending_roll = None;

        let just_won = game.has_won(player_id);
        let next_player = if just_won {
            game.winner = Some(player_id.to_string());
            None
        } else {
            game.current_turn = game.next_turn_index();
            game.current_player().cloned()
        };

        let mut events = vec![GameEvent::PieceMoved {
            code: code.to_string(),
            player_id: player_id.to_string(),
            piece_index,
            new_position,
            positions,
            next_player,
            just_won,
            skip: !plan.captures.is_empty(),
        }];
        events.extend(plan.captures.into_iter().map(|capture| GameEvent::PieceCaptured {
            code: code.to_string(),
            player_id: capture.player_id,
            piece_index: capture.piece_index,
            captured_by: player_id.to_string(),
        }));
        Ok(events)
    }

    fn set_player_state(
        &mut self,
        code: &str,
        player_id: &str,
        online: bool,
    ) -> Result<Vec<GameEvent>, GameError> {
        let game = self.game_mut(code)?;
        let player = game
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or(GameError::PlayerNotFound)?;
        player.online = online;
        Ok(vec![GameEvent::PlayerStateChanged {
            code: code.to_string(),
            player_id: player_id.to_string(),
            online,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str) -> Player {
        Player {
            id: id.to_string(),
            name: format!("name-{id}"),
            online: true,
        }
    }

    /// Game "G" with players a and b joined and started; a to move.
    fn started_game() -> GameManager {
        let mut manager = GameManager::new();
        manager
            .apply(&Command::CreateGame { code: "G".into() })
            .unwrap();
        for id in ["a", "b"] {
            manager
                .apply(&Command::JoinGame {
                    code: "G".into(),
                    player: player(id),
                })
                .unwrap();
        }
        manager
            .apply(&Command::StartGame { code: "G".into() })
            .unwrap();
        manager
    }

    fn set_positions(manager: &mut GameManager, player_id: &str, positions: [Position; 4]) {
        manager
            .games
            .get_mut("G")
            .unwrap()
            .positions
            .insert(player_id.to_string(), positions);
    }

    fn set_roll(manager: &mut GameManager, roll: u8) {
        manager.games.get_mut("G").unwrap().pending_roll = Some(roll);
    }

    #[test]
    fn test_home_exit_requires_six() {
        assert_eq!(next_position(HOME, 6, 10), Ok(10));
        assert_eq!(
            next_position(HOME, 3, 10),
            Err(GameError::NeedSixToLeaveHome)
        );
        assert_eq!(
            GameError::NeedSixToLeaveHome.to_string(),
            "Need 6 to move out of home."
        );
    }

    #[test]
    fn test_main_track_wraps_around() {
        assert_eq!(next_position(38, 4, 10), Ok(2));
        assert_eq!(next_position(5, 3, 0), Ok(8));
    }

    #[test]
    fn test_finish_lane_entry_and_overshoot() {
        assert_eq!(next_position(38, 2, 0), Ok(40));
        // 38 + 5 from offset 0 lands on the last lane slot (43) and is legal.
        assert_eq!(next_position(38, 5, 0), Ok(43));
        assert_eq!(
            next_position(38, 6, 0),
            Err(GameError::FinishLaneOvershoot)
        );
        assert_eq!(
            GameError::FinishLaneOvershoot.to_string(),
            "Roll too large to enter finish lane."
        );
        // Player starting at 10 enters its lane after square 9.
        assert_eq!(next_position(8, 3, 10), Ok(41));
    }

    #[test]
    fn test_out_of_range_rolls_are_rejected() {
        assert_eq!(next_position(5, 0, 0), Err(GameError::InvalidRoll));
        assert_eq!(next_position(5, 7, 0), Err(GameError::InvalidRoll));
        assert_eq!(next_position(38, 200, 0), Err(GameError::InvalidRoll));
        assert_eq!(next_position(HOME, u8::MAX, 0), Err(GameError::InvalidRoll));
    }

    #[test]
    fn test_finish_lane_moves_are_bounded() {
        assert_eq!(next_position(40, 3, 0), Ok(43));
        assert_eq!(
            next_position(41, 3, 0),
            Err(GameError::FinishLaneOverrun)
        );
    }

    #[test]
    fn test_join_assigns_start_offsets_in_join_order() {
        let manager = started_game();
        let game = manager.game("G").unwrap();
        assert_eq!(game.start_offset["a"], 0);
        assert_eq!(game.start_offset["b"], 10);
        assert_eq!(game.positions["b"], [HOME; 4]);
    }

    #[test]
    fn test_join_rejects_full_duplicate_and_started() {
        let mut manager = GameManager::new();
        manager
            .apply(&Command::CreateGame { code: "G".into() })
            .unwrap();
        for id in ["a", "b", "c", "d"] {
            manager
                .apply(&Command::JoinGame {
                    code: "G".into(),
                    player: player(id),
                })
                .unwrap();
        }
        let fifth = Command::JoinGame {
            code: "G".into(),
            player: player("e"),
        };
        assert_eq!(manager.apply(&fifth), Err(GameError::GameFull));

        let mut manager = started_game();
        let duplicate = Command::JoinGame {
            code: "G".into(),
            player: Player {
                id: "z".into(),
                name: "name-a".into(),
                online: true,
            },
        };
        assert_eq!(manager.apply(&duplicate), Err(GameError::NameTaken));

        let late = Command::JoinGame {
            code: "G".into(),
            player: player("c"),
        };
        assert_eq!(manager.apply(&late), Err(GameError::AlreadyStarted));
        assert_eq!(
            manager.apply(&Command::JoinGame {
                code: "missing".into(),
                player: player("c"),
            }),
            Err(GameError::GameNotFound)
        );
    }

    #[test]
    fn test_capture_sends_opponent_home_and_sets_skip() {
        let mut manager = started_game();
        set_positions(&mut manager, "a", [8, HOME, HOME, HOME]);
        set_positions(&mut manager, "b", [12, HOME, HOME, HOME]);
        set_roll(&mut manager, 4);

        let events = manager
            .apply(&Command::MovePiece {
                code: "G".into(),
                player_id: "a".into(),
                piece_index: 0,
                new_position: 12,
            })
            .unwrap();

        let game = manager.game("G").unwrap();
        assert_eq!(game.positions["a"][0], 12);
        assert_eq!(game.positions["b"][0], HOME);
        assert!(matches!(
            &events[0],
            GameEvent::PieceMoved { skip: true, .. }
        ));
        assert_eq!(
            events[1],
            GameEvent::PieceCaptured {
                code: "G".into(),
                player_id: "b".into(),
                piece_index: 0,
                captured_by: "a".into(),
            }
        );
        assert_eq!(game.current_player().unwrap().id, "b");
    }

    #[test]
    fn test_own_piece_blocks_destination() {
        let mut manager = started_game();
        set_positions(&mut manager, "a", [8, 12, HOME, HOME]);
        set_roll(&mut manager, 4);
        let err = manager
            .game("G")
            .unwrap()
            .plan_move("a", 0)
            .unwrap_err();
        assert_eq!(err, GameError::PositionTaken);
    }

    #[test]
    fn test_failed_move_leaves_state_untouched() {
        let mut manager = started_game();
        set_roll(&mut manager, 3);
        let before = manager.clone();
        let result = manager.apply(&Command::MovePiece {
            code: "G".into(),
            player_id: "a".into(),
            piece_index: 0,
            new_position: 0,
        });
        assert_eq!(result, Err(GameError::NeedSixToLeaveHome));
        assert_eq!(manager, before);
    }

    #[test]
    fn test_move_is_deterministic() {
        let mut first = started_game();
        set_positions(&mut first, "a", [30, 5, HOME, 41]);
        set_positions(&mut first, "b", [33, HOME, HOME, HOME]);
        set_roll(&mut first, 3);
        let mut second = first.clone();

        let command = Command::MovePiece {
            code: "G".into(),
            player_id: "a".into(),
            piece_index: 0,
            new_position: 33,
        };
        let first_events = first.apply(&command).unwrap();
        let second_events = second.apply(&command).unwrap();
        assert_eq!(first, second);
        assert_eq!(first_events, second_events);
    }

    #[test]
    fn test_roll_without_pieces_out_forfeits_turn() {
        let mut manager = started_game();
        let events = manager
            .apply(&Command::RollDice {
                code: "G".into(),
                player_id: "a".into(),
                roll: 3,
                next_turn: Some("b".into()),
            })
            .unwrap();
        let game = manager.game("G").unwrap();
        assert_eq!(game.pending_roll, None);
        assert_eq!(game.current_player().unwrap().id, "b");
        assert!(matches!(
            &events[0],
            GameEvent::DiceRolled { roll: 3, next_turn: Some(p), .. } if p.id == "b"
        ));
    }

    #[test]
    fn test_roll_validation() {
        let mut manager = started_game();
        let wrong_player = Command::RollDice {
            code: "G".into(),
            player_id: "b".into(),
            roll: 6,
            next_turn: None,
        };
        assert_eq!(manager.apply(&wrong_player), Err(GameError::NotYourTurn));

        manager
            .apply(&Command::RollDice {
                code: "G".into(),
                player_id: "a".into(),
                roll: 6,
                next_turn: None,
            })
            .unwrap();
        let again = Command::RollDice {
            code: "G".into(),
            player_id: "a".into(),
            roll: 2,
            next_turn: None,
        };
        assert_eq!(manager.apply(&again), Err(GameError::DiceAlreadyRolled));
    }

    #[test]
    fn test_logged_roll_outcome_must_match_local_state() {
        let mut manager = started_game();
        let command = Command::RollDice {
            code: "G".into(),
            player_id: "a".into(),
            roll: 2,
            next_turn: None,
        };
        assert!(matches!(
            manager.apply(&command),
            Err(GameError::Diverged(_))
        ));
    }

    #[test]
    fn test_turn_advance_skips_offline_players() {
        let mut manager = GameManager::new();
        manager
            .apply(&Command::CreateGame { code: "G".into() })
            .unwrap();
        for id in ["a", "b", "c"] {
            manager
                .apply(&Command::JoinGame {
                    code: "G".into(),
                    player: player(id),
                })
                .unwrap();
        }
        manager
            .apply(&Command::SetPlayerState {
                code: "G".into(),
                player_id: "b".into(),
                online: false,
            })
            .unwrap();
        let game = manager.game("G").unwrap();
        assert_eq!(game.next_turn_index(), 2);
    }

    #[test]
    fn test_four_pieces_in_finish_lane_win() {
        let mut manager = started_game();
        set_positions(&mut manager, "a", [38, 40, 41, 43]);
        set_roll(&mut manager, 4);
        let events = manager
            .apply(&Command::MovePiece {
                code: "G".into(),
                player_id: "a".into(),
                piece_index: 0,
                new_position: 42,
            })
            .unwrap();
        let game = manager.game("G").unwrap();
        assert_eq!(game.winner.as_deref(), Some("a"));
        assert!(matches!(
            &events[0],
            GameEvent::PieceMoved { just_won: true, next_player: None, .. }
        ));
        let roll = Command::RollDice {
            code: "G".into(),
            player_id: "a".into(),
            roll: 6,
            next_turn: None,
        };
        assert_eq!(manager.apply(&roll), Err(GameError::GameOver));
    }

    #[test]
    fn test_start_requires_players() {
        let mut manager = GameManager::new();
        manager
            .apply(&Command::CreateGame { code: "G".into() })
            .unwrap();
        assert_eq!(
            manager.apply(&Command::StartGame { code: "G".into() }),
            Err(GameError::NoPlayers)
        );
        assert_eq!(
            manager.apply(&Command::CreateGame { code: "G".into() }),
            Err(GameError::GameExists)
        );
    }
}
