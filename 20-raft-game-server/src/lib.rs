//! Raft-replicated board-game server.
//!
//! A small cluster of nodes keeps game state (players, turns, piece positions)
//! identical on every member by replicating game commands through a Raft log.
//!
//! # Architecture
//!
//! Client requests enter through the gateway on the leader. The leader fixes
//! random values (codes, player ids, dice), applies the command to its own game
//! state right away, appends it to the log, and replicates it with its next
//! heartbeats. Followers apply entries once they learn they are committed.
//!
//! # Modules
//!
//! - [`node`]: synchronous Raft core that owns the log and the game state
//! - [`runtime`]: tokio worker that drives a node with timers and RPCs
//! - [`gateway`]: turns client requests into logged commands on the leader
//! - [`game`]: the deterministic state machine and board rules
//! - [`command`]: logged commands and client requests
//! - [`events`]: notifications emitted when commands are applied
//! - [`message`]: RPC payloads and JSON-lines framing
//! - [`transport`]: how nodes reach each other (TCP or in-memory)
//! - [`server`]: TCP listener that feeds peer RPCs to the worker
//! - [`topology`] and [`config`]: static membership and timing
//! - [`protocol`]: operator console parsing

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod game;
pub mod gateway;
pub mod message;
pub mod node;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod topology;
pub mod transport;
