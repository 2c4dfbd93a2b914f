//! How a node reaches its peers.
//!
//! [`RaftTransport`] is the seam between the worker and the network. The
//! worker wraps every call in its own deadline, so implementations only need
//! to deliver one request and return one reply.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::message::{
    AppendEntriesReply, AppendEntriesRequest, RequestVoteReply, RequestVoteRequest, RpcRequest,
    RpcResponse, read_message, write_message,
};
use crate::node::NodeId;
use crate::runtime::NodeHandle;
use crate::topology::PeerConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no address known for peer {0}")]
    UnknownPeer(NodeId),
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),
    #[error("rpc deadline exceeded")]
    Timeout,
    #[error("connection closed before a reply arrived")]
    Closed,
    #[error("peer answered with an error: {0}")]
    Remote(String),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(
        &self,
        peer: &str,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteReply, TransportError>;

    async fn append_entries(
        &self,
        peer: &str,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError>;
}

/// Newline-delimited JSON over TCP, one connection per call.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    addresses: HashMap<NodeId, String>,
}

impl TcpTransport {
    pub fn new(addresses: HashMap<NodeId, String>) -> Self {
        Self { addresses }
    }

    pub fn from_peers(peers: &[PeerConfig]) -> Self {
        Self::new(
            peers
                .iter()
                .map(|p| (p.id.clone(), p.address()))
                .collect(),
        )
    }

    async fn call(&self, peer: &str, request: RpcRequest) -> Result<RpcResponse, TransportError> {
        let addr = self
            .addresses
            .get(peer)
            .ok_or_else(|| TransportError::UnknownPeer(peer.to_string()))?;
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_message(&mut write_half, &request).await?;
        match read_message::<_, RpcResponse>(&mut reader).await? {
            Some(RpcResponse::Error { message }) => Err(TransportError::Remote(message)),
            Some(response) => Ok(response),
            None => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl RaftTransport for TcpTransport {
    async fn request_vote(
        &self,
        peer: &str,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteReply, TransportError> {
        match self.call(peer, RpcRequest::RequestVote(request)).await? {
            RpcResponse::RequestVote(reply) => Ok(reply),
            _ => Err(TransportError::UnexpectedReply("request_vote")),
        }
    }

    async fn append_entries(
        &self,
        peer: &str,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        match self.call(peer, RpcRequest::AppendEntries(request)).await? {
            RpcResponse::AppendEntries(reply) => Ok(reply),
            _ => Err(TransportError::UnexpectedReply("append_entries")),
        }
    }
}

/// In-process network for tests and local demos.
///
/// Calls go straight to the target node's mailbox. Isolating a node drops
/// every call to or from it until it is healed.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    nodes: Mutex<HashMap<NodeId, NodeHandle>>,
    isolated: Mutex<HashSet<NodeId>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, handle: NodeHandle) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert(handle.id().to_string(), handle);
    }

    pub fn transport_for(self: &Arc<Self>, id: &str) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            local: id.to_string(),
            network: Arc::clone(self),
        })
    }

    pub fn isolate(&self, id: &str) {
        self.isolated.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.isolated.lock().unwrap().remove(id);
    }

    pub fn heal_all(&self) {
        self.isolated.lock().unwrap().clear();
    }

    pub fn is_isolated(&self, id: &str) -> bool {
        self.isolated.lock().unwrap().contains(id)
    }

    fn route(&self, from: &str, to: &str) -> Result<NodeHandle, TransportError> {
        if self.is_isolated(from) || self.is_isolated(to) {
            return Err(TransportError::Unreachable(to.to_string()));
        }
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(to.to_string()))
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    local: NodeId,
    network: Arc<MemoryNetwork>,
}

#[async_trait]
impl RaftTransport for MemoryTransport {
    async fn request_vote(
        &self,
        peer: &str,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteReply, TransportError> {
        let target = self.network.route(&self.local, peer)?;
        let reply = target.request_vote(request).await?;
        // A partition that forms mid-call loses the reply as well.
        self.network.route(peer, &self.local)?;
        Ok(reply)
    }

    async fn append_entries(
        &self,
        peer: &str,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        let target = self.network.route(&self.local, peer)?;
        let reply = target.append_entries(request).await?;
        self.network.route(peer, &self.local)?;
        Ok(reply)
    }
}
