//! Shared harness: an in-process cluster wired through a `MemoryNetwork`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep};

use raft_game_server::command::GameRequest;
use raft_game_server::config::RaftTiming;
use raft_game_server::events::Notification;
use raft_game_server::node::Role;
use raft_game_server::runtime::{NodeConfig, NodeHandle, NodeStatus, spawn_node};
use raft_game_server::transport::MemoryNetwork;

pub const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(20);

pub fn fast_timing() -> RaftTiming {
    RaftTiming {
        election_timeout_min: Duration::from_millis(150),
        election_timeout_max: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(30),
        rpc_timeout: Duration::from_millis(100),
        max_commit_rounds: 50,
    }
}

pub fn create_game(code: &str) -> GameRequest {
    GameRequest::CreateGame {
        code: Some(code.to_string()),
    }
}

pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    handles: BTreeMap<String, NodeHandle>,
    notifications: HashMap<String, UnboundedReceiver<Notification>>,
}

impl TestCluster {
    pub fn spawn(n: usize) -> Self {
        Self::spawn_with(n, fast_timing())
    }

    pub fn spawn_with(n: usize, timing: RaftTiming) -> Self {
        let network = MemoryNetwork::new();
        let ids: Vec<String> = (1..=n).map(|i| format!("node{i}")).collect();
        let mut handles = BTreeMap::new();
        let mut notifications = HashMap::new();

        for id in &ids {
            let peers = ids.iter().filter(|p| *p != id).cloned().collect();
            let config = NodeConfig {
                id: id.clone(),
                peers,
                timing,
            };
            let (handle, events) = spawn_node(config, network.transport_for(id));
            network.register(handle.clone());
            handles.insert(id.clone(), handle);
            notifications.insert(id.clone(), events);
        }

        Self {
            network,
            handles,
            notifications,
        }
    }

    pub fn node(&self, id: &str) -> &NodeHandle {
        &self.handles[id]
    }

    pub fn ids(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    pub fn ids_except(&self, excluded: &str) -> Vec<String> {
        self.handles
            .keys()
            .filter(|id| *id != excluded)
            .cloned()
            .collect()
    }

    pub fn notifications(&mut self, id: &str) -> &mut UnboundedReceiver<Notification> {
        self.notifications.get_mut(id).expect("node exists")
    }

    pub async fn statuses(&self, ids: &[String]) -> Result<Vec<NodeStatus>> {
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            statuses.push(self.node(id).status().await?);
        }
        Ok(statuses)
    }

    /// Waits until exactly one of `ids` is leader and the rest follow it.
    pub async fn wait_for_leader_among(&self, ids: &[String], timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let statuses = self.statuses(ids).await?;
            let leaders: Vec<&NodeStatus> =
                statuses.iter().filter(|s| s.role == Role::Leader).collect();
            if let [leader] = leaders.as_slice() {
                let settled = statuses.iter().all(|s| {
                    s.leader_id.as_deref() == Some(leader.node_id.as_str())
                        && s.term == leader.term
                });
                if settled {
                    return Ok(leader.node_id.clone());
                }
            }
            if Instant::now() >= deadline {
                bail!("timeout waiting for a single leader among {ids:?}");
            }
            sleep(POLL).await;
        }
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<String> {
        self.wait_for_leader_among(&self.ids(), timeout).await
    }

    /// Polls `check` against one node's status until it holds.
    pub async fn wait_for_status<F>(&self, id: &str, timeout: Duration, check: F) -> Result<NodeStatus>
    where
        F: Fn(&NodeStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.node(id).status().await?;
            if check(&status) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                bail!("timeout waiting on {id}, last status {status:?}");
            }
            sleep(POLL).await;
        }
    }

    /// Waits until every node in `ids` has applied game `code`.
    pub async fn wait_for_game(&self, ids: &[String], code: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        'poll: loop {
            for id in ids {
                if self.node(id).game(code).await?.is_none() {
                    if Instant::now() >= deadline {
                        bail!("game {code} never reached {id}");
                    }
                    sleep(POLL).await;
                    continue 'poll;
                }
            }
            return Ok(());
        }
    }

    pub fn shutdown(&self) {
        for handle in self.handles.values() {
            let _ = handle.shutdown();
        }
    }
}
