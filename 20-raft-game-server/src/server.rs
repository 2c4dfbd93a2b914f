//! TCP listener that serves consensus RPCs from peers.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, warn};

use crate::message::{RpcRequest, RpcResponse, read_message, write_message};
use crate::runtime::NodeHandle;

pub struct RpcServer {
    listener: TcpListener,
    handle: NodeHandle,
}

impl RpcServer {
    pub fn new(listener: TcpListener, handle: NodeHandle) -> Self {
        Self { listener, handle }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RpcServer { listener, handle } = self;
        tokio::pin!(shutdown);
        info!(node = %handle.id(), addr = ?listener.local_addr().ok(), "rpc server listening");

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(node = %handle.id(), "rpc server shutting down");
                    break;
                }
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer)) => spawn_connection(stream, peer, &handle),
                    Err(err) => warn!(error = ?err, "failed to accept peer connection"),
                }
            }
        }

        Ok(())
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, handle: &NodeHandle) {
    let handle = handle.clone();
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &handle).await {
            debug!(peer = %peer, error = ?err, "peer connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, handle: &NodeHandle) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    while let Some(request) = read_message::<_, RpcRequest>(&mut reader).await? {
        let response = dispatch(handle, request).await;
        write_message(&mut write_half, &response).await?;
    }
    Ok(())
}

async fn dispatch(handle: &NodeHandle, request: RpcRequest) -> RpcResponse {
    let result = match request {
        RpcRequest::RequestVote(request) => handle
            .request_vote(request)
            .await
            .map(RpcResponse::RequestVote),
        RpcRequest::AppendEntries(request) => handle
            .append_entries(request)
            .await
            .map(RpcResponse::AppendEntries),
    };
    result.unwrap_or_else(|err| RpcResponse::Error {
        message: err.to_string(),
    })
}
