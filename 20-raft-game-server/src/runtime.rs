//! Async worker that drives a [`RaftNode`].
//!
//! Each node runs as one tokio task that owns the `RaftNode` outright:
//!
//! - **Mailbox**: client submissions, inbound RPCs and outbound RPC results all
//!   arrive on a single `mpsc` channel, so protocol state is never shared
//! - **Timers**: a randomized election deadline while not leading, a fixed
//!   heartbeat interval while leading
//! - **Outbound RPCs**: spawned tasks, each with its own deadline, that post
//!   their result back into the mailbox
//!
//! Commit waiters are resolved when the commit index moves, not by polling.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::command::GameRequest;
use crate::config::RaftTiming;
use crate::error::{ConsensusError, SubmitError};
use crate::events::Notification;
use crate::game::Game;
use crate::gateway::{self, SubmitReceipt};
use crate::message::{
    AppendEntriesReply, AppendEntriesRequest, LogEntry, RequestVoteReply, RequestVoteRequest,
};
use crate::node::{LogIndex, NodeId, RaftNode, Role, Term};
use crate::transport::{RaftTransport, TransportError};

/// Configuration for spawning a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    /// Other cluster members, reachable through the transport.
    pub peers: Vec<NodeId>,
    pub timing: RaftTiming,
}

/// Point-in-time view of a node, for operators and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub role: Role,
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub log_len: usize,
    pub optimistic: Vec<LogIndex>,
    pub diverged: Vec<LogIndex>,
    pub games: usize,
}

/// Cloneable handle to a running node worker.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    request_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl NodeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Submits a game request and waits until its log entry commits.
    ///
    /// # Errors
    /// - `NotLeader` when this node does not lead (with a redirect hint)
    /// - `CatchingUp` right after an election, until inherited entries are applied
    /// - a game error when the request is invalid; nothing is logged then
    /// - `LeadershipLost` when the node steps down before the entry commits
    /// - `ConsensusTimeout` after the configured number of heartbeat rounds
    pub async fn submit(&self, request: GameRequest) -> Result<SubmitReceipt, SubmitError> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(WorkerMessage::Submit {
                request,
                respond_to,
            })
            .map_err(|_| ConsensusError::Shutdown)?;
        response.await.map_err(|_| ConsensusError::Shutdown)?
    }

    pub async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteReply, TransportError> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(WorkerMessage::RequestVote {
                request,
                respond_to,
            })
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)
    }

    pub async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(WorkerMessage::AppendEntries {
                request,
                respond_to,
            })
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(WorkerMessage::Status { respond_to })
            .context("failed to send status request")?;
        response.await.context("status response channel closed")
    }

    /// Snapshot of one game as this node currently sees it.
    pub async fn game(&self, code: &str) -> Result<Option<Game>> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(WorkerMessage::Game {
                code: code.to_string(),
                respond_to,
            })
            .context("failed to send game request")?;
        response.await.context("game response channel closed")
    }

    pub async fn log(&self) -> Result<Vec<LogEntry>> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(WorkerMessage::Log { respond_to })
            .context("failed to send log request")?;
        response.await.context("log response channel closed")
    }

    /// Starts an election right away instead of waiting for the timer.
    ///
    /// Ignored while leading.
    pub fn campaign(&self) -> Result<()> {
        self.request_tx
            .send(WorkerMessage::Campaign)
            .context("failed to send campaign request")
    }

    /// Signals the worker to stop. Pending submissions fail with `Shutdown`.
    pub fn shutdown(&self) -> Result<()> {
        self.request_tx
            .send(WorkerMessage::Shutdown)
            .context("failed to send shutdown")
    }
}

enum WorkerMessage {
    Submit {
        request: GameRequest,
        respond_to: oneshot::Sender<Result<SubmitReceipt, SubmitError>>,
    },
    RequestVote {
        request: RequestVoteRequest,
        respond_to: oneshot::Sender<RequestVoteReply>,
    },
    AppendEntries {
        request: AppendEntriesRequest,
        respond_to: oneshot::Sender<AppendEntriesReply>,
    },
    VoteResult {
        peer: NodeId,
        term: Term,
        result: Result<RequestVoteReply, TransportError>,
    },
    AppendResult {
        peer: NodeId,
        request: AppendEntriesRequest,
        result: Result<AppendEntriesReply, TransportError>,
    },
    Status {
        respond_to: oneshot::Sender<NodeStatus>,
    },
    Game {
        code: String,
        respond_to: oneshot::Sender<Option<Game>>,
    },
    Log {
        respond_to: oneshot::Sender<Vec<LogEntry>>,
    },
    Campaign,
    Shutdown,
}

/// A submission waiting for its log entry to commit.
struct CommitWaiter {
    receipt: SubmitReceipt,
    rounds_left: u32,
    respond_to: oneshot::Sender<Result<SubmitReceipt, SubmitError>>,
}

/// Spawns a node worker on the current tokio runtime.
///
/// Returns the handle plus the stream of notifications produced by applying
/// commands on this node.
pub fn spawn_node(
    config: NodeConfig,
    transport: Arc<dyn RaftTransport>,
) -> (NodeHandle, mpsc::UnboundedReceiver<Notification>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    let node = RaftNode::new(config.id.clone(), config.peers);
    let mut worker = Worker {
        node,
        transport,
        timing: config.timing,
        inbox: request_rx,
        self_tx: request_tx.clone(),
        notify_tx,
        rng: StdRng::from_entropy(),
        election_deadline: Instant::now(),
        next_heartbeat: Instant::now(),
        in_flight: HashSet::new(),
        waiters: BTreeMap::new(),
        last_role: Role::Follower,
    };
    worker.reset_election_deadline();
    tokio::spawn(worker.run());

    (
        NodeHandle {
            id: config.id,
            request_tx,
        },
        notify_rx,
    )
}

enum Wakeup {
    Message(Option<WorkerMessage>),
    ElectionTimeout,
    Heartbeat,
}

struct Worker {
    node: RaftNode,
    transport: Arc<dyn RaftTransport>,
    timing: RaftTiming,
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    self_tx: mpsc::UnboundedSender<WorkerMessage>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    rng: StdRng,
    election_deadline: Instant,
    next_heartbeat: Instant,
    /// Peers with an AppendEntries call outstanding.
    in_flight: HashSet<NodeId>,
    waiters: BTreeMap<LogIndex, CommitWaiter>,
    last_role: Role,
}

impl Worker {
    async fn run(mut self) {
        info!(node = %self.node.id(), peers = ?self.node.peers(), "node worker started");
        loop {
            let leading = self.node.is_leader();
            let wakeup = tokio::select! {
                message = self.inbox.recv() => Wakeup::Message(message),
                _ = sleep_until(self.election_deadline), if !leading => Wakeup::ElectionTimeout,
                _ = sleep_until(self.next_heartbeat), if leading => Wakeup::Heartbeat,
            };

            match wakeup {
                Wakeup::Message(None) | Wakeup::Message(Some(WorkerMessage::Shutdown)) => break,
                Wakeup::Message(Some(message)) => self.handle_message(message),
                Wakeup::ElectionTimeout => self.start_election(),
                Wakeup::Heartbeat => self.heartbeat(),
            }
            self.after_step();
        }

        self.fail_waiters(|_| ConsensusError::Shutdown);
        info!(node = %self.node.id(), "node worker stopped");
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Submit {
                request,
                respond_to,
            } => self.handle_submit(request, respond_to),
            WorkerMessage::RequestVote {
                request,
                respond_to,
            } => {
                let reply = self.node.handle_request_vote(&request);
                if reply.vote_granted {
                    self.reset_election_deadline();
                }
                let _ = respond_to.send(reply);
            }
            WorkerMessage::AppendEntries {
                request,
                respond_to,
            } => {
                let current_leader = request.term >= self.node.term();
                let reply = self.node.handle_append_entries(&request);
                if current_leader {
                    self.reset_election_deadline();
                }
                let _ = respond_to.send(reply);
            }
            WorkerMessage::VoteResult { peer, term, result } => match result {
                Ok(reply) => {
                    self.node.handle_vote_reply(&peer, term, &reply);
                }
                Err(err) => {
                    debug!(node = %self.node.id(), peer = %peer, error = %err, "vote request failed");
                }
            },
            WorkerMessage::AppendResult {
                peer,
                request,
                result,
            } => {
                self.in_flight.remove(&peer);
                match result {
                    Ok(reply) => {
                        let outcome = self.node.handle_append_reply(&peer, &request, &reply);
                        debug!(node = %self.node.id(), peer = %peer, ?outcome, "append entries reply");
                    }
                    Err(err) => {
                        debug!(node = %self.node.id(), peer = %peer, error = %err, "append entries failed");
                    }
                }
            }
            WorkerMessage::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            WorkerMessage::Game { code, respond_to } => {
                let _ = respond_to.send(self.node.game(&code).cloned());
            }
            WorkerMessage::Log { respond_to } => {
                let _ = respond_to.send(self.node.log().to_vec());
            }
            WorkerMessage::Campaign => self.start_election(),
            WorkerMessage::Shutdown => {}
        }
    }

    fn handle_submit(
        &mut self,
        request: GameRequest,
        respond_to: oneshot::Sender<Result<SubmitReceipt, SubmitError>>,
    ) {
        let receipt = match gateway::submit(&mut self.node, request, &mut self.rng) {
            Ok(receipt) => receipt,
            Err(err) => {
                let _ = respond_to.send(Err(err));
                return;
            }
        };

        if receipt.index <= self.node.commit_index() {
            let _ = respond_to.send(Ok(receipt));
            return;
        }
        self.waiters.insert(
            receipt.index,
            CommitWaiter {
                receipt,
                rounds_left: self.timing.max_commit_rounds,
                respond_to,
            },
        );
        self.send_append_entries();
    }

    fn start_election(&mut self) {
        self.reset_election_deadline();
        let Some(request) = self.node.start_election() else {
            return;
        };

        for peer in self.node.peers().to_vec() {
            let transport = Arc::clone(&self.transport);
            let reply_tx = self.self_tx.clone();
            let request = request.clone();
            let rpc_timeout = self.timing.rpc_timeout;
            tokio::spawn(async move {
                let term = request.term;
                let result = timeout(rpc_timeout, transport.request_vote(&peer, request))
                    .await
                    .unwrap_or(Err(TransportError::Timeout));
                let _ = reply_tx.send(WorkerMessage::VoteResult { peer, term, result });
            });
        }
    }

    /// One leader heartbeat round: age the commit waiters, then replicate.
    fn heartbeat(&mut self) {
        self.next_heartbeat = Instant::now() + self.timing.heartbeat_interval;

        let mut expired = Vec::new();
        for (index, waiter) in self.waiters.iter_mut() {
            waiter.rounds_left = waiter.rounds_left.saturating_sub(1);
            if waiter.rounds_left == 0 {
                expired.push(*index);
            }
        }
        for index in expired {
            if let Some(waiter) = self.waiters.remove(&index) {
                warn!(node = %self.node.id(), index, "entry did not reach a majority in time");
                let _ = waiter.respond_to.send(Err(ConsensusError::ConsensusTimeout {
                    index,
                    rounds: self.timing.max_commit_rounds,
                }
                .into()));
            }
        }

        self.send_append_entries();
    }

    fn send_append_entries(&mut self) {
        for peer in self.node.peers().to_vec() {
            if self.in_flight.contains(&peer) {
                continue;
            }
            let Some(request) = self.node.append_entries_for(&peer) else {
                return;
            };
            self.in_flight.insert(peer.clone());

            let transport = Arc::clone(&self.transport);
            let reply_tx = self.self_tx.clone();
            let rpc_timeout = self.timing.rpc_timeout;
            tokio::spawn(async move {
                let result = timeout(rpc_timeout, transport.append_entries(&peer, request.clone()))
                    .await
                    .unwrap_or(Err(TransportError::Timeout));
                let _ = reply_tx.send(WorkerMessage::AppendResult {
                    peer,
                    request,
                    result,
                });
            });
        }
    }

    /// Bookkeeping shared by every loop iteration.
    fn after_step(&mut self) {
        let role = self.node.role();
        if role != self.last_role {
            info!(
                node = %self.node.id(),
                term = self.node.term(),
                from = ?self.last_role,
                to = ?role,
                "role changed"
            );
            if self.last_role == Role::Leader {
                self.in_flight.clear();
                self.reset_election_deadline();
                let term = self.node.term();
                self.fail_waiters(|index| {
                    debug!(index, term, "failing commit waiter after step-down");
                    ConsensusError::LeadershipLost { index }
                });
            }
            self.last_role = role;
            if role == Role::Leader {
                self.heartbeat();
            }
        }

        self.resolve_waiters();
        for notification in self.node.take_notifications() {
            let _ = self.notify_tx.send(notification);
        }
    }

    fn resolve_waiters(&mut self) {
        let commit_index = self.node.commit_index();
        while let Some(entry) = self.waiters.first_entry() {
            if *entry.key() > commit_index {
                break;
            }
            let waiter = entry.remove();
            let index = waiter.receipt.index;
            let result = if self.node.term_at(index) == waiter.receipt.term {
                Ok(waiter.receipt)
            } else {
                Err(ConsensusError::LeadershipLost { index }.into())
            };
            let _ = waiter.respond_to.send(result);
        }
    }

    fn fail_waiters(&mut self, reason: impl Fn(LogIndex) -> ConsensusError) {
        for (index, waiter) in std::mem::take(&mut self.waiters) {
            let _ = waiter.respond_to.send(Err(reason(index).into()));
        }
    }

    fn reset_election_deadline(&mut self) {
        let wait: Duration = self
            .rng
            .gen_range(self.timing.election_timeout_min..=self.timing.election_timeout_max);
        self.election_deadline = Instant::now() + wait;
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node.id().to_string(),
            role: self.node.role(),
            term: self.node.term(),
            leader_id: self.node.leader_id().map(str::to_string),
            commit_index: self.node.commit_index(),
            last_applied: self.node.last_applied(),
            log_len: self.node.log().len(),
            optimistic: self.node.optimistic_indices(),
            diverged: self.node.diverged_indices().to_vec(),
            games: self.node.games().len(),
        }
    }
}
