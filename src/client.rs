//! Client engine: connect, authenticate, and exchange messages with
//! the node-local server.
//!
//! A client discovers its server from the inherited environment,
//! performs the bounded handshake, and then runs a small engine task
//! owning the posted-receive table and dynamic-tag allocator. `send` is
//! fire-and-forget; [`Client::send_recv`] allocates a dynamic tag from
//! the client's half of the tag space, posts a one-shot receive, and
//! resolves when the reply arrives, or fails when the connection is
//! lost, which is the sole unblocking mechanism.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::connect(ClientConfig::from_env(ProcId::new("job-1", 0))?).await?;
//!
//! let mut buf = Buffer::new(BufferKind::FullyDescribed);
//! codec.pack(&mut buf, &[Value::String("ready".into())], ids::STRING)?;
//! let (header, reply) = client.send_recv(buf).await?;
//! ```

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::buffer::{Buffer, BufferKind};
use crate::codec::{Codec, ProcId};
use crate::error::{ProclinkError, Result};
use crate::handshake::{self, ClientHello, DEFAULT_HANDSHAKE_WINDOW};
use crate::mux::{Multiplexer, RecvHandler, TagAllocator};
use crate::protocol::{
    own_dynamic_range, spawn_writer_task, Header, Message, MessageReader, PendingSend,
    WriterHandle, DEFAULT_MAX_MSG_SIZE,
};
use crate::security::SecurityRegistry;
use crate::transport::{Endpoint, SocketStream};

use bytes::Bytes;

/// Client configuration.
pub struct ClientConfig {
    /// Server endpoint; discovered from the environment by
    /// [`ClientConfig::from_env`].
    pub endpoint: Endpoint,
    /// This process's identity (as registered with the server).
    pub id: ProcId,
    /// Connection-fatal payload ceiling.
    pub max_msg_size: u32,
    /// Time budget for the handshake.
    pub handshake_window: Duration,
    /// Credential modules; the default module is presented.
    pub security: SecurityRegistry,
    /// Codec for handshake blobs and payloads.
    pub codec: Codec,
    /// Buffer kind to negotiate.
    pub buffer_kind: BufferKind,
}

impl ClientConfig {
    /// Configuration from the inherited `PROCLINK_*` environment.
    pub fn from_env(id: ProcId) -> Result<Self> {
        Ok(Self::for_endpoint(Endpoint::from_env()?, id))
    }

    /// Configuration for an explicit endpoint.
    pub fn for_endpoint(endpoint: Endpoint, id: ProcId) -> Self {
        Self {
            endpoint,
            id,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            handshake_window: DEFAULT_HANDSHAKE_WINDOW,
            security: SecurityRegistry::with_native(),
            codec: Codec::with_builtins(),
            buffer_kind: BufferKind::FullyDescribed,
        }
    }
}

enum EngineCmd {
    Send {
        tag: u32,
        payload: Vec<u8>,
    },
    SendRecv {
        payload: Vec<u8>,
        handler: RecvHandler,
        reply: oneshot::Sender<Result<u32>>,
    },
    PostRecv {
        tag: u32,
        handler: RecvHandler,
    },
    Inbound {
        msg: Message,
    },
    Lost,
    Connected {
        reply: oneshot::Sender<bool>,
    },
    Finalize {
        done: oneshot::Sender<()>,
    },
}

/// A connected client.
#[derive(Debug)]
pub struct Client {
    tx: mpsc::UnboundedSender<EngineCmd>,
    pindex: u32,
    engine_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl Client {
    /// Connect, handshake, and start the engine.
    pub async fn connect(config: ClientConfig) -> Result<Client> {
        let mut stream = SocketStream::connect(&config.endpoint.socket_path).await?;

        let module = config.security.default_module();
        let mut hello = ClientHello::client(module.name(), module.credential(), config.id.clone())
            .with_self_assertions();
        hello.buffer_kind = config.buffer_kind;
        hello.codec_name = config.endpoint.codec_name.clone();
        hello.store_name = config.endpoint.store_name.clone();

        handshake::send_hello(stream.inner_mut(), &hello, &config.codec).await?;
        let pindex = handshake::read_reply(stream.inner_mut(), config.handshake_window).await?;
        tracing::debug!(pindex, id = %config.id, "connected to server");

        let (rd, wr) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(wr);

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine {
            rx,
            mux: Multiplexer::new(config.buffer_kind),
            tags: TagAllocator::new(own_dynamic_range()),
            writer,
            writer_task,
            pindex,
            connected: true,
        };
        let engine_task = tokio::spawn(engine.run());
        let reader_task = tokio::spawn(read_loop(rd, tx.clone(), config.max_msg_size));

        Ok(Client {
            tx,
            pindex,
            engine_task,
            reader_task,
        })
    }

    /// Index the server assigned this client.
    pub fn pindex(&self) -> u32 {
        self.pindex
    }

    fn dispatch(&self, cmd: EngineCmd) -> Result<()> {
        self.tx.send(cmd).map_err(|_| ProclinkError::Unreachable)
    }

    /// Fire-and-forget send on a tag. Transport failures are not
    /// returned here; they surface through the lost-connection path.
    pub fn send(&self, tag: u32, mut buf: Buffer) -> Result<()> {
        self.dispatch(EngineCmd::Send {
            tag,
            payload: buf.unload(),
        })
    }

    /// Register a persistent receive (server-assigned subscription
    /// tag).
    pub fn post_recv(&self, tag: u32, handler: RecvHandler) -> Result<()> {
        self.dispatch(EngineCmd::PostRecv { tag, handler })
    }

    /// Request/reply: returns the reply header and payload, or
    /// [`ProclinkError::LostConnection`] if the connection dies first.
    pub async fn send_recv(&self, buf: Buffer) -> Result<(Header, Buffer)> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);
        self.send_recv_with(
            buf,
            Box::new(move |event| {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send((event.header, event.payload));
                }
            }),
        )
        .await?;
        let (header, payload) = done_rx.await.map_err(|_| ProclinkError::LostConnection)?;
        Ok((header, payload?))
    }

    /// Request/reply with an explicit callback; returns the allocated
    /// dynamic tag.
    pub async fn send_recv_with(&self, mut buf: Buffer, handler: RecvHandler) -> Result<u32> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(EngineCmd::SendRecv {
            payload: buf.unload(),
            handler,
            reply,
        })?;
        rx.await.map_err(|_| ProclinkError::Unreachable)?
    }

    /// True until the connection is lost.
    pub async fn connected(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.dispatch(EngineCmd::Connected { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Orderly shutdown: close the socket and stop the engine.
    pub async fn finalize(self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        if self.dispatch(EngineCmd::Finalize { done }).is_ok() {
            let _ = rx.await;
        }
        self.reader_task.abort();
        let _ = self.engine_task.await;
        Ok(())
    }
}

async fn read_loop(
    mut rd: tokio::net::unix::OwnedReadHalf,
    engine: mpsc::UnboundedSender<EngineCmd>,
    max_msg_size: u32,
) {
    let mut reader = MessageReader::with_max_msg_size(max_msg_size);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match rd.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => match reader.push(&buf[..n]) {
                Ok(msgs) => {
                    for msg in msgs {
                        if engine.send(EngineCmd::Inbound { msg }).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("fatal inbound framing error: {}", e);
                    break;
                }
            },
            Err(e) => {
                tracing::debug!("read error: {}", e);
                break;
            }
        }
    }
    let _ = engine.send(EngineCmd::Lost);
}

struct Engine {
    rx: mpsc::UnboundedReceiver<EngineCmd>,
    mux: Multiplexer,
    tags: TagAllocator,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    pindex: u32,
    connected: bool,
}

impl Engine {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                EngineCmd::Send { tag, payload } => self.send(tag, payload),
                EngineCmd::SendRecv {
                    payload,
                    handler,
                    reply,
                } => {
                    let result = if self.connected {
                        let tag = self.tags.next();
                        self.mux.post(tag, handler);
                        self.send(tag, payload);
                        Ok(tag)
                    } else {
                        Err(ProclinkError::LostConnection)
                    };
                    let _ = reply.send(result);
                }
                EngineCmd::PostRecv { tag, handler } => self.mux.post(tag, handler),
                EngineCmd::Inbound { msg } => {
                    if let Err(e) = self.mux.deliver(msg) {
                        tracing::warn!("dropping message: {}", e);
                    }
                }
                EngineCmd::Lost => self.lost_connection(),
                EngineCmd::Connected { reply } => {
                    let _ = reply.send(self.connected);
                }
                EngineCmd::Finalize { done } => {
                    self.writer_task.abort();
                    let _ = done.send(());
                    return;
                }
            }
        }
    }

    fn send(&mut self, tag: u32, payload: Vec<u8>) {
        if !self.connected {
            tracing::debug!(tag, "send after lost connection dropped");
            return;
        }
        let header = Header::new(self.pindex, tag, payload.len() as u32);
        if self
            .writer
            .send(PendingSend::new(&header, Bytes::from(payload)))
            .is_err()
        {
            self.lost_connection();
        }
    }

    /// Mark the connection disconnected and synthetically fail every
    /// outstanding dynamic-tag receive so no caller blocks forever.
    fn lost_connection(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        tracing::info!("connection to server lost");
        self.writer_task.abort();
        self.mux.fail_outstanding_dynamic();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ids, Value};
    use crate::server::{Server, ServerConfig};

    async fn server_with_client(nspace: &str) -> (Server, Client) {
        let server = Server::start(ServerConfig::default()).await.unwrap();
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        let id = ProcId::new(nspace, 0);
        server
            .handle()
            .register_client(id.clone(), uid, gid)
            .await
            .unwrap();
        let config = ClientConfig::for_endpoint(server.endpoint().clone(), id);
        let client = Client::connect(config).await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_connect_and_pindex() {
        let (server, client) = server_with_client("cli-1").await;
        assert!(client.pindex() >= 1);
        assert!(client.connected().await);
        client.finalize().await.unwrap();
        server.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_recv_round_trip() {
        let (server, client) = server_with_client("cli-2").await;

        // server-side responder: echo every unmatched request back on
        // the tag it arrived with (the client's dynamic reply tag)
        let handle = server.handle();
        server
            .handle()
            .post_recv(
                crate::protocol::TAG_WILDCARD,
                Box::new(move |event| {
                    let payload = event
                        .payload
                        .map(|b| b.as_slice().to_vec())
                        .unwrap_or_default();
                    let reply = Buffer::load(payload, BufferKind::FullyDescribed);
                    let _ = handle.send(event.header.pindex, event.header.tag, reply);
                }),
            )
            .unwrap();

        let codec = Codec::with_builtins();
        let mut buf = Buffer::new(BufferKind::FullyDescribed);
        codec
            .pack(&mut buf, &[Value::Uint32(42)], ids::UINT32)
            .unwrap();

        let (header, mut reply) = client.send_recv(buf).await.unwrap();
        assert!(header.tag >= crate::protocol::TAG_DYNAMIC);
        let vals = codec.unpack(&mut reply, 1, ids::UINT32).unwrap();
        assert_eq!(vals, vec![Value::Uint32(42)]);

        client.finalize().await.unwrap();
        server.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_connection_fails_outstanding_send_recv() {
        let (server, client) = server_with_client("cli-3").await;

        // no responder posted: the reply never comes
        let mut buf = Buffer::new(BufferKind::FullyDescribed);
        buf.put_u32(1);
        let pending = client.send_recv(buf);

        // kill the server while the request is outstanding
        let killer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.finalize().await.unwrap();
        });

        let err = pending.await.unwrap_err();
        assert!(matches!(err, ProclinkError::LostConnection));
        assert!(!client.connected().await);
        killer.await.unwrap();
        client.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_lost_is_dropped_not_hung() {
        let (server, client) = server_with_client("cli-4").await;
        server.finalize().await.unwrap();

        // wait for the client to notice
        for _ in 0..100 {
            if !client.connected().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // fire-and-forget after loss: accepted and discarded
        let mut buf = Buffer::new(BufferKind::FullyDescribed);
        buf.put_u32(9);
        client.send(60, buf).unwrap();

        // request/reply after loss fails immediately
        let mut buf = Buffer::new(BufferKind::FullyDescribed);
        buf.put_u32(9);
        let err = client.send_recv(buf).await.unwrap_err();
        assert!(matches!(err, ProclinkError::LostConnection));
        client.finalize().await.unwrap();
    }
}
