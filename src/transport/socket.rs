//! Unix-domain-socket listener and stream wrappers.
//!
//! The server binds a private rendezvous socket; clients discover its
//! path through the environment (see [`super::endpoint`]). The listener
//! removes a stale socket file on bind and cleans up on drop.

use std::path::Path;

use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;
use crate::security::PeerIdentity;

/// Generate a unique rendezvous path for this process.
///
/// Format: `/tmp/proclink-{pid}-{nonce}.sock`
pub fn generate_socket_path() -> String {
    let pid = std::process::id();
    format!("/tmp/proclink-{}-{:x}.sock", pid, nonce())
}

/// Nonce mixed from the clock and pid; good enough for a per-process
/// private path under /tmp.
fn nonce() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos.wrapping_mul(0x517cc1b727220a95) ^ std::process::id() as u64
}

/// Listener on a Unix socket path.
pub struct SocketListener {
    listener: UnixListener,
    path: String,
}

impl SocketListener {
    /// Bind, replacing any stale socket file at the path.
    pub fn bind(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<SocketStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(SocketStream { stream })
    }

    /// The bound path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A connected Unix socket.
#[derive(Debug)]
pub struct SocketStream {
    stream: UnixStream,
}

impl SocketStream {
    /// Connect to a server's rendezvous path.
    pub async fn connect(path: &str) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Kernel-verified credentials of the process on the other end.
    pub fn peer_identity(&self) -> Result<PeerIdentity> {
        let cred = self.stream.peer_cred()?;
        Ok(PeerIdentity {
            uid: cred.uid(),
            gid: cred.gid(),
        })
    }

    /// Split into owned read and write halves for the engine tasks.
    pub fn into_split(
        self,
    ) -> (
        tokio::net::unix::OwnedReadHalf,
        tokio::net::unix::OwnedWriteHalf,
    ) {
        self.stream.into_split()
    }

    /// Borrow the underlying stream (handshake phase).
    pub fn inner_mut(&mut self) -> &mut UnixStream {
        &mut self.stream
    }
}
