use std::collections::HashSet;

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// One statically configured cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl PeerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses an `id=host:port` entry.
    pub fn parse(entry: &str) -> Result<Self> {
        let (id, addr) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid peer entry '{entry}', expected id=host:port"))?;
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("invalid peer address '{addr}', expected host:port"))?;
        let id = id.trim();
        ensure!(!id.is_empty(), "peer entry '{entry}' has an empty id");
        ensure!(!host.is_empty(), "peer entry '{entry}' has an empty host");
        let port = port
            .parse()
            .with_context(|| format!("invalid port in peer entry '{entry}'"))?;
        Ok(Self {
            id: id.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// Static cluster membership, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    members: Vec<PeerConfig>,
}

impl ClusterTopology {
    pub fn new(members: Vec<PeerConfig>) -> Result<Self> {
        ensure!(!members.is_empty(), "topology requires at least one node");
        let mut seen = HashSet::new();
        for member in &members {
            ensure!(
                seen.insert(member.id.as_str()),
                "duplicate node id '{}' in topology",
                member.id
            );
        }
        Ok(Self { members })
    }

    /// Three nodes on localhost, ports 50051-50053.
    pub fn demo() -> Self {
        let members = (1..=3)
            .map(|n| PeerConfig {
                id: format!("node{n}"),
                host: "127.0.0.1".to_string(),
                port: 50050 + n,
            })
            .collect();
        Self { members }
    }

    pub fn members(&self) -> &[PeerConfig] {
        &self.members
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.id.as_str())
    }

    pub fn member(&self, id: &str) -> Option<&PeerConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Every member except `id`. Fails if `id` is not a member.
    pub fn peers_of(&self, id: &str) -> Result<Vec<PeerConfig>> {
        ensure!(
            self.member(id).is_some(),
            "node '{id}' is not part of the cluster ({})",
            self.ids().collect::<Vec<_>>().join(", ")
        );
        Ok(self
            .members
            .iter()
            .filter(|m| m.id != id)
            .cloned()
            .collect())
    }

    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }
}
