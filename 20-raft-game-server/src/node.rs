//! Core Raft node implementation.
//!
//! [`RaftNode`] is a synchronous state machine: it never sleeps, never touches
//! the network, and never looks at a clock. Callers feed it RPCs and replies
//! and read back requests to send. The async worker in [`crate::runtime`]
//! drives it with timers and a transport, and the tests in this module drive
//! it by hand.
//!
//! The node also owns the game state machine. Committed entries are applied to
//! it in log order. A leader applies its own proposals before they commit
//! (see [`RaftNode::propose`]); those indices are remembered so they are not
//! applied twice, and if one is later truncated by a new leader the node
//! records the divergence instead of silently repairing it.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::{ConsensusError, ConsensusResult, SubmitError};
use crate::events::{GameEvent, Notification};
use crate::game::{Game, GameManager};
use crate::message::{
    AppendEntriesReply, AppendEntriesRequest, LogEntry, RequestVoteReply, RequestVoteRequest,
};

pub type NodeId = String;
pub type Term = u64;
/// Zero-based position in the log. [`NO_INDEX`] means "before the first entry".
pub type LogIndex = i64;

pub const NO_INDEX: LogIndex = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// What the leader learned from one AppendEntries reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The follower holds everything up to `match_index`.
    Replicated { match_index: LogIndex },
    /// Consistency check failed; the next attempt starts at `next_index`.
    BackedOff { next_index: LogIndex },
    /// The follower has a newer term. This node is now a follower.
    SteppedDown,
    /// Reply to a request from an older term or an earlier role.
    Ignored,
}

/// A single consensus participant together with its game state machine.
///
/// Field semantics follow the Raft paper, with 0-based indices:
/// - `commit_index` and `last_applied` start at [`NO_INDEX`] and never decrease
/// - `next_index` / `match_index` are only meaningful while leader and are
///   reset every time this node wins an election
pub struct RaftNode {
    id: NodeId,
    peers: Vec<NodeId>,
    role: Role,
    current_term: Term,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: Vec<LogEntry>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    votes: HashSet<NodeId>,
    /// Indices this node applied as leader before they committed.
    optimistic: BTreeSet<LogIndex>,
    /// Optimistic indices that were later overwritten by another leader.
    diverged: Vec<LogIndex>,
    games: GameManager,
    outbox: Vec<Notification>,
}

impl RaftNode {
    /// Creates a follower in term 0 with an empty log.
    ///
    /// `peers` lists the cluster members; an entry equal to `id` is dropped.
    pub fn new(id: impl Into<NodeId>, peers: Vec<NodeId>) -> Self {
        let id = id.into();
        let peers = peers.into_iter().filter(|p| *p != id).collect();
        Self {
            id,
            peers,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            commit_index: NO_INDEX,
            last_applied: NO_INDEX,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes: HashSet::new(),
            optimistic: BTreeSet::new(),
            diverged: Vec::new(),
            games: GameManager::new(),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn term(&self) -> Term {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.voted_for.as_deref()
    }

    /// The leader this node last heard from in its current term (itself when leading).
    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn next_index(&self, peer: &str) -> Option<LogIndex> {
        self.next_index.get(peer).copied()
    }

    pub fn match_index(&self, peer: &str) -> Option<LogIndex> {
        self.match_index.get(peer).copied()
    }

    /// Applied-but-uncommitted indices, oldest first.
    pub fn optimistic_indices(&self) -> Vec<LogIndex> {
        self.optimistic.iter().copied().collect()
    }

    pub fn diverged_indices(&self) -> &[LogIndex] {
        &self.diverged
    }

    pub fn games(&self) -> &GameManager {
        &self.games
    }

    pub fn game(&self, code: &str) -> Option<&Game> {
        self.games.game(code)
    }

    pub fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    pub fn last_log_index(&self) -> LogIndex {
        self.log.len() as LogIndex - 1
    }

    pub fn last_log_term(&self) -> Term {
        self.term_at(self.last_log_index())
    }

    /// Term of the entry at `index`, or 0 when there is no such entry.
    pub fn term_at(&self, index: LogIndex) -> Term {
        self.entry(index).map_or(0, |e| e.term)
    }

    fn entry(&self, index: LogIndex) -> Option<&LogEntry> {
        usize::try_from(index).ok().and_then(|i| self.log.get(i))
    }

    /// True once every entry in the log is reflected in the game state, either
    /// applied at commit or applied ahead of it by this node.
    pub fn is_caught_up(&self) -> bool {
        self.last_log_index() - self.last_applied == self.optimistic.len() as LogIndex
    }

    /// Refuses new proposals while inherited entries are still unapplied, so
    /// local applies never run ahead of log order.
    pub fn ensure_caught_up(&self) -> ConsensusResult<()> {
        if self.is_caught_up() {
            Ok(())
        } else {
            Err(ConsensusError::CatchingUp {
                last_applied: self.last_applied,
                last_log_index: self.last_log_index(),
            })
        }
    }

    /// Drains the events produced since the last call.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    // ---------------------------------------------------------------------
    // Elections
    // ---------------------------------------------------------------------

    /// Moves to candidate in a new term and votes for itself.
    ///
    /// Returns the RequestVote to broadcast, or `None` if this node is already
    /// leader. A single-node cluster wins immediately.
    pub fn start_election(&mut self) -> Option<RequestVoteRequest> {
        if self.role == Role::Leader {
            return None;
        }

        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id.clone());
        self.leader_id = None;
        self.votes.clear();
        self.votes.insert(self.id.clone());
        info!(node = %self.id, term = self.current_term, "starting election");

        let request = RequestVoteRequest {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };
        self.try_win_election();
        Some(request)
    }

    pub fn handle_request_vote(&mut self, request: &RequestVoteRequest) -> RequestVoteReply {
        if request.term < self.current_term {
            let err = ConsensusError::StaleTerm {
                received: request.term,
                current: self.current_term,
            };
            debug!(node = %self.id, candidate = %request.candidate_id, error = %err, "vote refused");
            return RequestVoteReply {
                term: self.current_term,
                vote_granted: false,
            };
        }
        self.observe_term(request.term);

        let up_to_date = request.last_log_term > self.last_log_term()
            || (request.last_log_term == self.last_log_term()
                && request.last_log_index >= self.last_log_index());
        let free_to_vote = self
            .voted_for
            .as_ref()
            .map_or(true, |v| *v == request.candidate_id);
        let vote_granted = up_to_date && free_to_vote;

        if vote_granted {
            self.voted_for = Some(request.candidate_id.clone());
        }
        debug!(
            node = %self.id,
            term = self.current_term,
            candidate = %request.candidate_id,
            granted = vote_granted,
            up_to_date,
            "handled vote request"
        );
        RequestVoteReply {
            term: self.current_term,
            vote_granted,
        }
    }

    /// Counts a vote. Returns true if this reply made the node leader.
    pub fn handle_vote_reply(
        &mut self,
        from: &str,
        request_term: Term,
        reply: &RequestVoteReply,
    ) -> bool {
        if self.observe_term(reply.term) {
            return false;
        }
        if self.role != Role::Candidate || request_term != self.current_term || !reply.vote_granted
        {
            return false;
        }
        self.votes.insert(from.to_string());
        self.try_win_election()
    }

    fn try_win_election(&mut self) -> bool {
        if self.role == Role::Candidate && self.votes.len() >= self.majority() {
            self.become_leader();
            true
        } else {
            false
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.id.clone());
        let next = self.log.len() as LogIndex;
        self.next_index = self.peers.iter().map(|p| (p.clone(), next)).collect();
        self.match_index = self.peers.iter().map(|p| (p.clone(), NO_INDEX)).collect();
        info!(
            node = %self.id,
            term = self.current_term,
            votes = self.votes.len(),
            log_len = self.log.len(),
            "became leader"
        );

        // Inherited entries only commit behind an entry from this term.
        if self.commit_index < self.last_log_index() {
            self.log.push(LogEntry::noop(self.current_term));
            debug!(node = %self.id, index = self.last_log_index(), "appended leader no-op");
            self.advance_commit_index();
        }
    }

    /// Adopts a newer term and falls back to follower. Returns true if the term changed.
    fn observe_term(&mut self, term: Term) -> bool {
        if term <= self.current_term {
            return false;
        }
        debug!(node = %self.id, from = self.current_term, to = term, "observed newer term");
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
        self.become_follower();
        true
    }

    fn become_follower(&mut self) {
        if self.role == Role::Leader && !self.optimistic.is_empty() {
            warn!(
                node = %self.id,
                term = self.current_term,
                uncommitted = ?self.optimistic,
                "stepping down with optimistically applied entries still uncommitted"
            );
        }
        self.role = Role::Follower;
        self.votes.clear();
    }

    // ---------------------------------------------------------------------
    // Log replication
    // ---------------------------------------------------------------------

    pub fn handle_append_entries(&mut self, request: &AppendEntriesRequest) -> AppendEntriesReply {
        let success = match self.accept_append(request) {
            Ok(()) => true,
            Err(err) => {
                debug!(node = %self.id, leader = %request.leader_id, error = %err, "append entries rejected");
                false
            }
        };
        AppendEntriesReply {
            term: self.current_term,
            success,
        }
    }

    fn accept_append(&mut self, request: &AppendEntriesRequest) -> ConsensusResult<()> {
        if request.term < self.current_term {
            return Err(ConsensusError::StaleTerm {
                received: request.term,
                current: self.current_term,
            });
        }
        self.observe_term(request.term);
        if self.role != Role::Follower {
            self.become_follower();
        }
        self.leader_id = Some(request.leader_id.clone());

        if request.prev_log_index != NO_INDEX {
            match self.entry(request.prev_log_index) {
                Some(entry) if entry.term == request.prev_log_term => {}
                _ => {
                    return Err(ConsensusError::LogMismatch {
                        prev_log_index: request.prev_log_index,
                        prev_log_term: request.prev_log_term,
                    });
                }
            }
        }

        self.merge_entries(request.prev_log_index, &request.entries);

        let last_new = request.prev_log_index + request.entries.len() as LogIndex;
        let target = request.leader_commit.min(last_new);
        if target > self.commit_index {
            debug!(node = %self.id, from = self.commit_index, to = target, "follower commit advanced");
            self.commit_index = target;
            self.apply_committed();
        }
        Ok(())
    }

    /// Appends `entries` after `prev_log_index`, truncating only where terms conflict.
    fn merge_entries(&mut self, prev_log_index: LogIndex, entries: &[LogEntry]) {
        for (offset, entry) in entries.iter().enumerate() {
            let index = prev_log_index + 1 + offset as LogIndex;
            match self.entry(index) {
                Some(existing) if existing.term == entry.term => continue,
                Some(_) => {
                    self.truncate_from(index);
                    self.log.push(entry.clone());
                }
                None => self.log.push(entry.clone()),
            }
        }
    }

    fn truncate_from(&mut self, index: LogIndex) {
        debug_assert!(index > self.commit_index, "committed entries are never truncated");
        let dropped = self.log.len() as LogIndex - index;
        let lost: Vec<LogIndex> = self.optimistic.range(index..).copied().collect();
        for lost_index in lost {
            self.optimistic.remove(&lost_index);
            self.diverged.push(lost_index);
            warn!(
                node = %self.id,
                index = lost_index,
                term = self.current_term,
                "optimistically applied entry was overwritten; local game state has diverged"
            );
        }
        info!(node = %self.id, from = index, dropped, "truncating conflicting log suffix");
        self.log.truncate(index as usize);
    }

    /// Builds the next AppendEntries for `peer` from its `next_index`.
    pub fn append_entries_for(&self, peer: &str) -> Option<AppendEntriesRequest> {
        if self.role != Role::Leader {
            return None;
        }
        let next = self.next_index.get(peer).copied()?;
        let prev_log_index = next - 1;
        let start = usize::try_from(next).unwrap_or(0).min(self.log.len());
        Some(AppendEntriesRequest {
            term: self.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term: self.term_at(prev_log_index),
            entries: self.log[start..].to_vec(),
            leader_commit: self.commit_index,
        })
    }

    pub fn handle_append_reply(
        &mut self,
        peer: &str,
        request: &AppendEntriesRequest,
        reply: &AppendEntriesReply,
    ) -> AppendOutcome {
        if self.observe_term(reply.term) {
            return AppendOutcome::SteppedDown;
        }
        if self.role != Role::Leader || request.term != self.current_term {
            return AppendOutcome::Ignored;
        }

        if reply.success {
            let acknowledged = request.prev_log_index + request.entries.len() as LogIndex;
            let matched = self.match_index.entry(peer.to_string()).or_insert(NO_INDEX);
            *matched = (*matched).max(acknowledged);
            let match_index = *matched;
            self.next_index.insert(peer.to_string(), match_index + 1);
            self.advance_commit_index();
            AppendOutcome::Replicated { match_index }
        } else {
            let next = self.next_index.entry(peer.to_string()).or_insert(0);
            *next = (*next - 1).max(0);
            let next_index = *next;
            debug!(node = %self.id, peer, next_index, "follower log mismatch, backing off");
            AppendOutcome::BackedOff { next_index }
        }
    }

    /// Commits the highest current-term index stored on a majority.
    ///
    /// Entries from earlier terms are only committed indirectly, when a later
    /// current-term entry commits.
    fn advance_commit_index(&mut self) -> bool {
        if self.role != Role::Leader {
            return false;
        }
        let majority = self.majority();
        let mut candidate = self.last_log_index();
        while candidate > self.commit_index {
            if self.term_at(candidate) != self.current_term {
                break;
            }
            let replicas = 1 + self.match_index.values().filter(|&&m| m >= candidate).count();
            if replicas >= majority {
                info!(
                    node = %self.id,
                    term = self.current_term,
                    from = self.commit_index,
                    to = candidate,
                    replicas,
                    "leader commit advanced"
                );
                self.commit_index = candidate;
                self.apply_committed();
                return true;
            }
            candidate -= 1;
        }
        false
    }

    /// Appends an opaque command to the leader's log and returns its index.
    pub fn append_log_entry(&mut self, command: String) -> ConsensusResult<LogIndex> {
        let index = self.push_entry(command)?;
        self.advance_commit_index();
        Ok(index)
    }

    fn push_entry(&mut self, command: String) -> ConsensusResult<LogIndex> {
        if self.role != Role::Leader {
            return Err(ConsensusError::NotLeader {
                leader: self.leader_id.clone(),
            });
        }
        self.log.push(LogEntry {
            term: self.current_term,
            command,
        });
        Ok(self.last_log_index())
    }

    /// Leader path for game commands: apply locally, then log.
    ///
    /// The command is applied to the local game state before replication, so
    /// a domain error is reported without ever touching the log. Events from
    /// the local apply are queued immediately with `committed: false`.
    ///
    /// A leader that has not yet applied its inherited entries answers
    /// [`ConsensusError::CatchingUp`] instead.
    pub fn propose(&mut self, command: &Command) -> Result<(LogIndex, Vec<GameEvent>), SubmitError> {
        if self.role != Role::Leader {
            return Err(ConsensusError::NotLeader {
                leader: self.leader_id.clone(),
            }
            .into());
        }
        self.ensure_caught_up()?;
        let payload = command.encode()?;
        let events = self.games.apply(command)?;
        let index = self.push_entry(payload)?;
        self.optimistic.insert(index);
        debug!(node = %self.id, index, command = command.name(), code = command.code(), "applied ahead of commit");
        self.record_events(index, self.current_term, false, events.clone());
        self.advance_commit_index();
        Ok((index, events))
    }

    /// Applies every committed entry not applied yet, in log order.
    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let index = self.last_applied;
            if self.optimistic.remove(&index) {
                continue;
            }
            let Some(entry) = self.entry(index) else {
                break;
            };
            if entry.is_noop() {
                continue;
            }
            let term = entry.term;
            let decoded = Command::decode(&entry.command);

            match decoded {
                Ok(command) => match self.games.apply(&command) {
                    Ok(events) => {
                        debug!(node = %self.id, index, command = command.name(), "applied committed entry");
                        self.record_events(index, term, true, events);
                    }
                    Err(err) => {
                        warn!(node = %self.id, index, command = command.name(), error = %err, "committed command rejected by game state");
                    }
                },
                Err(err) => {
                    warn!(node = %self.id, index, error = %err, "skipping undecodable log entry");
                }
            }
        }
    }

    fn record_events(&mut self, index: LogIndex, term: Term, committed: bool, events: Vec<GameEvent>) {
        self.outbox.extend(events.into_iter().map(|event| Notification {
            node_id: self.id.clone(),
            index,
            term,
            committed,
            event,
        }));
    }
}
