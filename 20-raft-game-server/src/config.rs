use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::topology::{ClusterTopology, PeerConfig};

/// Timer and retry settings for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftTiming {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    /// Deadline for a single RequestVote or AppendEntries call.
    pub rpc_timeout: Duration,
    /// Heartbeat rounds a submitted entry may wait for a majority.
    pub max_commit_rounds: u32,
}

impl Default for RaftTiming {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_secs(5),
            election_timeout_max: Duration::from_secs(10),
            heartbeat_interval: Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(2),
            max_commit_rounds: 20,
        }
    }
}

impl RaftTiming {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.election_timeout_min <= self.election_timeout_max,
            "election timeout range is empty ({:?} > {:?})",
            self.election_timeout_min,
            self.election_timeout_max
        );
        ensure!(
            self.heartbeat_interval < self.election_timeout_min,
            "heartbeat interval {:?} must be shorter than the election timeout {:?}",
            self.heartbeat_interval,
            self.election_timeout_min
        );
        ensure!(
            !self.rpc_timeout.is_zero(),
            "rpc timeout must be non-zero"
        );
        ensure!(self.max_commit_rounds > 0, "max commit rounds must be positive");
        Ok(())
    }
}

/// Optional timing overrides, in milliseconds. Used by the cluster file and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingOverrides {
    pub election_timeout_min_ms: Option<u64>,
    pub election_timeout_max_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub rpc_timeout_ms: Option<u64>,
    pub max_commit_rounds: Option<u32>,
}

impl TimingOverrides {
    pub fn apply(&self, base: RaftTiming) -> RaftTiming {
        let ms = Duration::from_millis;
        RaftTiming {
            election_timeout_min: self
                .election_timeout_min_ms
                .map_or(base.election_timeout_min, ms),
            election_timeout_max: self
                .election_timeout_max_ms
                .map_or(base.election_timeout_max, ms),
            heartbeat_interval: self
                .heartbeat_interval_ms
                .map_or(base.heartbeat_interval, ms),
            rpc_timeout: self.rpc_timeout_ms.map_or(base.rpc_timeout, ms),
            max_commit_rounds: self.max_commit_rounds.unwrap_or(base.max_commit_rounds),
        }
    }
}

/// On-disk cluster description:
///
/// ```json
/// {"members": [{"id": "node1", "host": "127.0.0.1", "port": 50051}],
///  "timing": {"heartbeat_interval_ms": 500}}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterFile {
    pub members: Vec<PeerConfig>,
    #[serde(default)]
    pub timing: TimingOverrides,
}

impl ClusterFile {
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("invalid cluster file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster file {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse cluster file {}", path.display()))
    }

    pub fn into_parts(self) -> Result<(ClusterTopology, RaftTiming)> {
        let topology = ClusterTopology::new(self.members)?;
        let timing = self.timing.apply(RaftTiming::default());
        timing.validate()?;
        Ok((topology, timing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let timing = RaftTiming::default();
        timing.validate().unwrap();
        assert_eq!(timing.rpc_timeout, Duration::from_secs(2));
        assert_eq!(timing.heartbeat_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_parses_cluster_file_with_overrides() {
        let file = ClusterFile::from_json(
            r#"{
                "members": [
                    {"id": "node1", "host": "127.0.0.1", "port": 50051},
                    {"id": "node2", "host": "127.0.0.1", "port": 50052}
                ],
                "timing": {"heartbeat_interval_ms": 100, "election_timeout_min_ms": 1000,
                           "election_timeout_max_ms": 2000}
            }"#,
        )
        .unwrap();
        let (topology, timing) = file.into_parts().unwrap();
        assert_eq!(topology.members().len(), 2);
        assert_eq!(timing.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(timing.election_timeout_max, Duration::from_secs(2));
        assert_eq!(timing.rpc_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_inverted_election_window() {
        let overrides = TimingOverrides {
            election_timeout_min_ms: Some(900),
            election_timeout_max_ms: Some(100),
            ..Default::default()
        };
        assert!(overrides.apply(RaftTiming::default()).validate().is_err());
    }
}
