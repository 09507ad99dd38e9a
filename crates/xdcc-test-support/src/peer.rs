//! Scripted DCC sender bound to a loopback port.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How the peer serves its payload.
#[derive(Debug, Clone)]
pub struct PeerScript {
    /// Bytes written per write call.
    pub chunk_size: usize,
    /// Stop sending after this many bytes and keep the socket open.
    pub stall_after: Option<usize>,
    /// How long a stalled peer keeps the socket open.
    pub stall_for: Duration,
}

impl Default for PeerScript {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            stall_after: None,
            stall_for: Duration::from_secs(30),
        }
    }
}

/// A one-shot DCC sender. Accepts a single connection, writes the payload
/// and closes.
pub struct ScriptedPeer {
    address: SocketAddr,
    task: JoinHandle<Result<usize>>,
}

impl ScriptedPeer {
    /// Bind a loopback listener and serve `payload` to the first client.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn serve(payload: Vec<u8>, script: PeerScript) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("bind scripted peer")?;
        let address = listener.local_addr().context("scripted peer address")?;
        let task = tokio::spawn(serve_one(listener, payload, script));
        Ok(Self { address, task })
    }

    /// Port the peer listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.address.port()
    }

    /// Address the peer listens on.
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Wait for the peer to finish and return the number of bytes it wrote.
    ///
    /// # Errors
    ///
    /// Returns an error if no client connected or the task panicked.
    pub async fn finish(self) -> Result<usize> {
        self.task.await.context("scripted peer task")?
    }
}

async fn serve_one(listener: TcpListener, payload: Vec<u8>, script: PeerScript) -> Result<usize> {
    let (mut socket, _) = listener.accept().await.context("accept client")?;
    let limit = script.stall_after.unwrap_or(payload.len()).min(payload.len());
    let mut written = 0;
    for chunk in payload[..limit].chunks(script.chunk_size.max(1)) {
        if socket.write_all(chunk).await.is_err() {
            return Ok(written);
        }
        written += chunk.len();
    }
    if script.stall_after.is_some() {
        tokio::time::sleep(script.stall_for).await;
    }
    let _ = socket.shutdown().await;
    Ok(written)
}
