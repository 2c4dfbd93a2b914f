//! CLI entry point for running one game-server node with an operator console.
//!
//! Every notification the node produces is logged; the console accepts the
//! game commands plus a few inspection commands (type `help`).
//!
//! # Example usage
//!
//! Start a 3-node cluster from a shared cluster file:
//! ```bash
//! cat > cluster.json <<'EOF'
//! {"members": [
//!   {"id": "node1", "host": "127.0.0.1", "port": 50051},
//!   {"id": "node2", "host": "127.0.0.1", "port": 50052},
//!   {"id": "node3", "host": "127.0.0.1", "port": 50053}
//! ]}
//! EOF
//! RAFT_NODE_ID=node1 cargo run --bin node -- --config cluster.json
//! RAFT_NODE_ID=node2 cargo run --bin node -- --config cluster.json
//! RAFT_NODE_ID=node3 cargo run --bin node -- --config cluster.json
//! ```
//!
//! or without a file:
//! ```bash
//! cargo run --bin node -- --id node1 \
//!   --peer node1=127.0.0.1:50051,node2=127.0.0.1:50052,node3=127.0.0.1:50053
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueHint};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use raft_game_server::config::{ClusterFile, RaftTiming, TimingOverrides};
use raft_game_server::events::Notification;
use raft_game_server::protocol::{ConsoleCommand, HELP};
use raft_game_server::runtime::{NodeConfig, NodeHandle, spawn_node};
use raft_game_server::server::RpcServer;
use raft_game_server::topology::{ClusterTopology, PeerConfig};
use raft_game_server::transport::TcpTransport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a node of the replicated game server")]
struct Args {
    /// Node id; must name one cluster member
    #[arg(long, env = "RAFT_NODE_ID")]
    id: String,

    /// JSON cluster file with members and optional timing overrides
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "peer")]
    config: Option<PathBuf>,

    /// Comma-separated member map: id=host:port,... (must include self)
    #[arg(long, value_delimiter = ',', value_hint = ValueHint::Other)]
    peer: Vec<String>,

    /// Bind address for peer RPCs; defaults to this node's configured address
    #[arg(long, value_hint = ValueHint::Hostname)]
    listen: Option<String>,

    #[arg(long)]
    election_timeout_min_ms: Option<u64>,

    #[arg(long)]
    election_timeout_max_ms: Option<u64>,

    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    /// Heartbeat rounds a command may wait for a majority before failing
    #[arg(long)]
    max_commit_rounds: Option<u32>,
}

impl Args {
    fn cluster(&self) -> Result<(ClusterTopology, RaftTiming)> {
        let (topology, timing) = match &self.config {
            Some(path) => ClusterFile::load(path)?.into_parts()?,
            None if self.peer.is_empty() => {
                bail!("no cluster given; pass --config <file> or --peer id=host:port,...")
            }
            None => {
                let members = self
                    .peer
                    .iter()
                    .map(|entry| PeerConfig::parse(entry))
                    .collect::<Result<Vec<_>>>()?;
                (ClusterTopology::new(members)?, RaftTiming::default())
            }
        };

        let overrides = TimingOverrides {
            election_timeout_min_ms: self.election_timeout_min_ms,
            election_timeout_max_ms: self.election_timeout_max_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            rpc_timeout_ms: self.rpc_timeout_ms,
            max_commit_rounds: self.max_commit_rounds,
        };
        let timing = overrides.apply(timing);
        timing.validate()?;
        Ok((topology, timing))
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let (topology, timing) = args.cluster()?;
    let me = topology
        .member(&args.id)
        .cloned()
        .with_context(|| format!("node id '{}' is not in the cluster", args.id))?;
    let peers = topology.peers_of(&args.id)?;

    let listen = args.listen.clone().unwrap_or_else(|| me.address());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    let transport = Arc::new(TcpTransport::from_peers(&peers));
    let config = NodeConfig {
        id: args.id.clone(),
        peers: peers.iter().map(|p| p.id.clone()).collect(),
        timing,
    };
    let (handle, notifications) = spawn_node(config, transport);
    info!(node = %args.id, listen = %listen, members = topology.members().len(), "node started");

    let server = RpcServer::new(listener, handle.clone());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run_until(async move {
        let _ = stop_rx.await;
    }));
    tokio::spawn(log_notifications(notifications));

    let console = run_console(&handle);
    tokio::select! {
        result = console => result?,
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received"),
    }

    let _ = handle.shutdown();
    let _ = stop_tx.send(());
    match server_task.await {
        Ok(Err(err)) => warn!(error = ?err, "rpc server exited with error"),
        Err(err) => warn!(error = ?err, "rpc server task failed"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

/// Stands in for the real-time broadcaster: every event is logged as JSON.
async fn log_notifications(mut notifications: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        let payload = serde_json::to_string(&notification.event).unwrap_or_default();
        info!(
            event = notification.event.name(),
            code = notification.event.code(),
            index = notification.index,
            term = notification.term,
            committed = notification.committed,
            %payload,
            "notification"
        );
    }
}

async fn run_console(handle: &NodeHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("error: {err}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Exit => break,
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Status => {
                let status = handle.status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            ConsoleCommand::Campaign => {
                handle.campaign()?;
                println!("election requested");
            }
            ConsoleCommand::Game { code } => match handle.game(&code).await? {
                Some(game) => println!("{}", serde_json::to_string_pretty(&game)?),
                None => println!("error: Game not found."),
            },
            ConsoleCommand::Submit(request) => match handle.submit(request).await {
                Ok(receipt) => {
                    println!("committed at index {} (term {})", receipt.index, receipt.term);
                    for event in &receipt.events {
                        println!("  {} {}", event.name(), serde_json::to_string(event)?);
                    }
                }
                Err(err) => match err.leader_hint() {
                    Some(leader) => println!("error: {err} (try {leader})"),
                    None => println!("error: {err}"),
                },
            },
        }
    }
    Ok(())
}
