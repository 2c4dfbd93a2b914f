use thiserror::Error;

use crate::game::GameError;
use crate::node::{LogIndex, NodeId, Term};

/// Failures of the consensus protocol itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// A request carried a term older than ours. The sender learns our term from the reply.
    #[error("stale term {received}, current term is {current}")]
    StaleTerm { received: Term, current: Term },

    /// The entry before the appended range is missing or has a different term.
    #[error("log mismatch at index {prev_log_index}, expected term {prev_log_term}")]
    LogMismatch {
        prev_log_index: LogIndex,
        prev_log_term: Term,
    },

    #[error("not the leader, leader hint is {leader:?}")]
    NotLeader { leader: Option<NodeId> },

    /// A new leader has not yet applied the entries it inherited. Retry once they commit.
    #[error("leader is still applying earlier entries ({last_applied} of {last_log_index})")]
    CatchingUp {
        last_applied: LogIndex,
        last_log_index: LogIndex,
    },

    #[error("leadership lost before index {index} committed")]
    LeadershipLost { index: LogIndex },

    #[error("index {index} did not commit within {rounds} replication rounds")]
    ConsensusTimeout { index: LogIndex, rounds: u32 },

    #[error("node is shutting down")]
    Shutdown,
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Everything that can go wrong when submitting a game command.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SubmitError {
    /// Leader to redirect to, when this node knows one.
    pub fn leader_hint(&self) -> Option<&str> {
        match self {
            SubmitError::Consensus(ConsensusError::NotLeader { leader }) => leader.as_deref(),
            _ => None,
        }
    }
}
