//! Operator console parsing.
//!
//! Lines typed at the node's prompt become [`ConsoleCommand`]s. Game commands
//! wrap a [`GameRequest`] and go through the gateway; the rest are local
//! inspection or control.

use anyhow::{Result, anyhow, bail};

use crate::command::GameRequest;

pub const HELP: &str = "\
commands (case-insensitive):
  create_game [CODE]                      (alias: create)
  join_game <CODE> <NAME>                 (alias: join)
  start_game <CODE>                       (alias: start)
  roll_dice <CODE> <PLAYER_ID>            (alias: roll)
  move_piece <CODE> <PLAYER_ID> <PIECE>   (alias: move)
  set_player_state <CODE> <PLAYER_ID> online|offline
  game <CODE>                             show this node's copy of a game
  status / s                              role, term, commit and divergence info
  campaign / c                            start an election now
  help / h
  exit / e";

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Submit(GameRequest),
    Game { code: String },
    Status,
    Campaign,
    Help,
    Exit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            bail!("empty command");
        };

        let cmd = first.to_lowercase();
        let normalized = match cmd.as_str() {
            "create" => "create_game",
            "join" => "join_game",
            "start" => "start_game",
            "roll" => "roll_dice",
            "move" => "move_piece",
            "s" => "status",
            "c" => "campaign",
            "h" | "?" => "help",
            "e" | "quit" => "exit",
            other => other,
        };
        let args = &parts[1..];

        let command = match (normalized, args.len()) {
            ("exit", 0) => ConsoleCommand::Exit,
            ("help", 0) => ConsoleCommand::Help,
            ("status", 0) => ConsoleCommand::Status,
            ("campaign", 0) => ConsoleCommand::Campaign,
            ("game", 1) => ConsoleCommand::Game {
                code: args[0].to_uppercase(),
            },
            ("create_game", 0) => ConsoleCommand::Submit(GameRequest::CreateGame { code: None }),
            ("create_game", 1) => ConsoleCommand::Submit(GameRequest::CreateGame {
                code: Some(args[0].to_string()),
            }),
            ("join_game", n) if n >= 2 => ConsoleCommand::Submit(GameRequest::JoinGame {
                code: args[0].to_uppercase(),
                name: args[1..].join(" "),
            }),
            ("start_game", 1) => ConsoleCommand::Submit(GameRequest::StartGame {
                code: args[0].to_uppercase(),
            }),
            ("roll_dice", 2) => ConsoleCommand::Submit(GameRequest::RollDice {
                code: args[0].to_uppercase(),
                player_id: args[1].to_string(),
            }),
            ("move_piece", 3) => {
                let piece_index = args[2]
                    .parse()
                    .map_err(|_| anyhow!("piece index must be a number between 0 and 3"))?;
                ConsoleCommand::Submit(GameRequest::MovePiece {
                    code: args[0].to_uppercase(),
                    player_id: args[1].to_string(),
                    piece_index,
                })
            }
            ("set_player_state", 3) => {
                let online = match args[2].to_lowercase().as_str() {
                    "online" | "on" | "true" => true,
                    "offline" | "off" | "false" => false,
                    other => bail!("expected online or offline, got '{other}'"),
                };
                ConsoleCommand::Submit(GameRequest::SetPlayerState {
                    code: args[0].to_uppercase(),
                    player_id: args[1].to_string(),
                    online,
                })
            }
            (
                "exit" | "help" | "status" | "campaign" | "game" | "create_game" | "join_game"
                | "start_game" | "roll_dice" | "move_piece" | "set_player_state",
                _,
            ) => bail!("wrong number of arguments for {normalized}. Type help for usage"),
            _ => bail!("unknown command '{first}'. Type help for usage"),
        };
        Ok(command)
    }
}
