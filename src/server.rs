//! Server engine: acceptor, peer arena, and the single event context.
//!
//! One engine task owns every piece of mutable state: the peer table,
//! the posted-receive table, collective trackers, the notification
//! cache. Everything else (acceptor, per-peer read loops, API handles
//! on other tasks) marshals work onto it through an unbounded command
//! channel and may await a oneshot for the result; callbacks run to
//! completion inside the engine. No socket operation ever blocks the
//! engine: reads and writes live in per-peer tasks, and the bounded
//! handshake window runs before a peer is admitted.
//!
//! # Example
//!
//! ```ignore
//! let server = Server::start(ServerConfig::default()).await?;
//! server.handle().register_client(ProcId::new("job-1", 0), uid, gid).await?;
//! for (key, value) in server.endpoint().to_env() {
//!     // place in the child's environment before spawning it
//! }
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::buffer::{Buffer, BufferKind};
use crate::codec::{Codec, ProcId};
use crate::collective::{CollectiveCallback, CollectiveKind, CollectiveStatus, CollectiveTracker};
use crate::error::{ProclinkError, Result};
use crate::handshake::{self, ClientHello, DEFAULT_HANDSHAKE_WINDOW, HANDSHAKE_OK, HANDSHAKE_REJECT};
use crate::mux::{Multiplexer, RecvHandler, TagAllocator};
use crate::peer::{PeerCompat, PeerInfo, PeerKind};
use crate::protocol::{
    peer_dynamic_range, spawn_writer_task, Header, Message, MessageReader, PendingSend,
    WriterHandle, DEFAULT_MAX_MSG_SIZE,
};
use crate::security::{PeerIdentity, SecurityRegistry};
use crate::store::{DataStore, HashStore};
use crate::transport::{generate_socket_path, Endpoint, SocketListener, SocketStream};

/// Peer index the server uses for itself; self-addressed sends bypass
/// the socket entirely.
pub const SELF_PINDEX: u32 = 0;

/// Hook invoked when a peer's connection is lost.
pub type LostHandler = Box<dyn Fn(ProcId) + Send>;

/// Upstream host hook for collectives spanning other nodes: called when
/// the local portion completes so the global operation cannot hang.
pub type HostHandler = Box<dyn Fn(CollectiveKind, Vec<ProcId>, CollectiveStatus) + Send>;

/// Server configuration.
pub struct ServerConfig {
    /// Rendezvous socket path; generated when absent.
    pub socket_path: Option<String>,
    /// Connection-fatal payload ceiling.
    pub max_msg_size: u32,
    /// Time budget for one handshake.
    pub handshake_window: Duration,
    /// Available credential modules.
    pub security: SecurityRegistry,
    /// Codec shared with every admitted peer.
    pub codec: Codec,
    /// Buffer kind for the server's own deliveries.
    pub buffer_kind: BufferKind,
    /// Data-store module receiving decoded records.
    pub store: Box<dyn DataStore>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            handshake_window: DEFAULT_HANDSHAKE_WINDOW,
            security: SecurityRegistry::with_native(),
            codec: Codec::with_builtins(),
            buffer_kind: BufferKind::FullyDescribed,
            store: Box::new(HashStore::new()),
        }
    }
}

/// Counts exposed for introspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub peers: usize,
    pub registrations: usize,
    pub posted_recvs: usize,
    pub collectives: usize,
    pub notifications: usize,
}

struct Registration {
    uid: u32,
    gid: u32,
}

struct PeerSlot {
    info: PeerInfo,
    compat: PeerCompat,
    writer: Option<WriterHandle>,
    writer_task: Option<JoinHandle<Result<()>>>,
    reader_task: Option<JoinHandle<()>>,
    tags: TagAllocator,
}

enum EngineCmd {
    RegisterClient {
        id: ProcId,
        uid: u32,
        gid: u32,
        done: oneshot::Sender<Result<()>>,
    },
    LookupRegistration {
        id: ProcId,
        reply: oneshot::Sender<Option<(u32, u32)>>,
    },
    GenerateToolId {
        uid: u32,
        gid: u32,
        reply: oneshot::Sender<ProcId>,
    },
    ReservePeer {
        info: PeerInfo,
        compat: PeerCompat,
        reply: oneshot::Sender<Result<u32>>,
    },
    ActivatePeer {
        pindex: u32,
        writer: WriterHandle,
        writer_task: JoinHandle<Result<()>>,
        reader_task: JoinHandle<()>,
    },
    Inbound {
        pindex: u32,
        msg: Message,
    },
    PeerLost {
        pindex: u32,
    },
    Send {
        dest: u32,
        tag: u32,
        payload: Vec<u8>,
    },
    SendRecv {
        dest: u32,
        payload: Vec<u8>,
        handler: RecvHandler,
        reply: oneshot::Sender<Result<u32>>,
    },
    PostRecv {
        tag: u32,
        handler: RecvHandler,
    },
    BeginCollective {
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        nlocal: usize,
        local_only: bool,
        callback: CollectiveCallback,
    },
    CollectiveArrived {
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        pindex: u32,
        reply_tag: u32,
    },
    HostCollectiveComplete {
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        status: CollectiveStatus,
    },
    CacheNotification {
        pindex: u32,
        payload: Vec<u8>,
    },
    StoreRecord {
        source: ProcId,
        info: crate::codec::InfoPair,
    },
    FetchRecord {
        source: ProcId,
        key: String,
        reply: oneshot::Sender<Option<crate::codec::Value>>,
    },
    PurgeRecords {
        source: ProcId,
    },
    SetLostHandler {
        handler: LostHandler,
    },
    SetHostHandler {
        handler: HostHandler,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
    Finalize {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable handle marshalling work onto the engine.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<EngineCmd>,
}

impl ServerHandle {
    fn dispatch(&self, cmd: EngineCmd) -> Result<()> {
        self.tx.send(cmd).map_err(|_| ProclinkError::Unreachable)
    }

    /// Register a client process prior to its connection. The identity
    /// must be on file before the peer's handshake arrives.
    pub async fn register_client(&self, id: ProcId, uid: u32, gid: u32) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.dispatch(EngineCmd::RegisterClient { id, uid, gid, done })?;
        rx.await.map_err(|_| ProclinkError::Unreachable)?
    }

    /// Register a persistent receive for a reserved tag.
    pub fn post_recv(&self, tag: u32, handler: RecvHandler) -> Result<()> {
        self.dispatch(EngineCmd::PostRecv { tag, handler })
    }

    /// Fire-and-forget send to a peer (or to self, bypassing the
    /// socket).
    pub fn send(&self, dest: u32, tag: u32, mut buf: Buffer) -> Result<()> {
        self.dispatch(EngineCmd::Send {
            dest,
            tag,
            payload: buf.unload(),
        })
    }

    /// Request/reply: allocates a dynamic tag from the destination
    /// peer's range, posts the one-shot receive, and sends. Returns the
    /// allocated tag.
    pub async fn send_recv(&self, dest: u32, mut buf: Buffer, handler: RecvHandler) -> Result<u32> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(EngineCmd::SendRecv {
            dest,
            payload: buf.unload(),
            handler,
            reply,
        })?;
        rx.await.map_err(|_| ProclinkError::Unreachable)?
    }

    /// Begin tracking a collective with `nlocal` expected local
    /// participants.
    pub fn begin_collective(
        &self,
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        nlocal: usize,
        local_only: bool,
        callback: CollectiveCallback,
    ) -> Result<()> {
        self.dispatch(EngineCmd::BeginCollective {
            kind,
            participants,
            nlocal,
            local_only,
            callback,
        })
    }

    /// Record a local participant checking in on a collective.
    pub fn collective_arrived(
        &self,
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        pindex: u32,
        reply_tag: u32,
    ) -> Result<()> {
        self.dispatch(EngineCmd::CollectiveArrived {
            kind,
            participants,
            pindex,
            reply_tag,
        })
    }

    /// Resolution callback from the upstream host for a non-local
    /// collective.
    pub fn host_collective_complete(
        &self,
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        status: CollectiveStatus,
    ) -> Result<()> {
        self.dispatch(EngineCmd::HostCollectiveComplete {
            kind,
            participants,
            status,
        })
    }

    /// Cache a notification payload for a peer; purged if the peer's
    /// connection is lost.
    pub fn cache_notification(&self, pindex: u32, payload: Vec<u8>) -> Result<()> {
        self.dispatch(EngineCmd::CacheNotification { pindex, payload })
    }

    /// Hand a fully decoded record to the data store. The store never
    /// sees raw bytes; decode first.
    pub fn store_record(&self, source: ProcId, info: crate::codec::InfoPair) -> Result<()> {
        self.dispatch(EngineCmd::StoreRecord { source, info })
    }

    /// Look up a record previously contributed by `source`.
    pub async fn fetch_record(
        &self,
        source: ProcId,
        key: &str,
    ) -> Result<Option<crate::codec::Value>> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(EngineCmd::FetchRecord {
            source,
            key: key.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ProclinkError::Unreachable)
    }

    /// Drop every record contributed by `source`.
    pub fn purge_records(&self, source: ProcId) -> Result<()> {
        self.dispatch(EngineCmd::PurgeRecords { source })
    }

    /// Install the lost-connection event hook.
    pub fn set_lost_handler(&self, handler: LostHandler) -> Result<()> {
        self.dispatch(EngineCmd::SetLostHandler { handler })
    }

    /// Install the upstream host hook for non-local collectives.
    pub fn set_host_handler(&self, handler: HostHandler) -> Result<()> {
        self.dispatch(EngineCmd::SetHostHandler { handler })
    }

    /// Engine counters.
    pub async fn stats(&self) -> Result<EngineStats> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(EngineCmd::Stats { reply })?;
        rx.await.map_err(|_| ProclinkError::Unreachable)
    }
}

/// A running server.
pub struct Server {
    handle: ServerHandle,
    endpoint: Endpoint,
    engine_task: JoinHandle<()>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind the rendezvous socket and start the engine and acceptor.
    pub async fn start(config: ServerConfig) -> Result<Server> {
        let path = config
            .socket_path
            .clone()
            .unwrap_or_else(generate_socket_path);
        let listener = SocketListener::bind(&path)?;
        let endpoint = Endpoint {
            socket_path: path,
            codec_name: "builtin".to_string(),
            store_name: config.store.name().to_string(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ServerHandle { tx };

        let engine = Engine::new(rx, config.buffer_kind, config.store);
        let engine_task = tokio::spawn(engine.run());

        let acceptor = Acceptor {
            engine: handle.clone(),
            security: config.security,
            codec: config.codec,
            window: config.handshake_window,
            max_msg_size: config.max_msg_size,
        };
        let accept_task = tokio::spawn(acceptor.run(listener));

        Ok(Server {
            handle,
            endpoint,
            engine_task,
            accept_task,
        })
    }

    /// Handle for marshalling work onto the engine.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Endpoint to advertise to spawned children.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Tear down: stop accepting, close every peer, end the engine.
    pub async fn finalize(self) -> Result<()> {
        self.accept_task.abort();
        let (done, rx) = oneshot::channel();
        if self.handle.dispatch(EngineCmd::Finalize { done }).is_ok() {
            let _ = rx.await;
        }
        let _ = self.engine_task.await;
        Ok(())
    }
}

// --------------------------------------------------------------------
// Acceptor
// --------------------------------------------------------------------

struct Acceptor {
    engine: ServerHandle,
    security: SecurityRegistry,
    codec: Codec,
    window: Duration,
    max_msg_size: u32,
}

impl Acceptor {
    async fn run(self, listener: SocketListener) {
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    let conn = Connection {
                        engine: self.engine.clone(),
                        security: self.security.clone(),
                        codec: self.codec.clone(),
                        window: self.window,
                        max_msg_size: self.max_msg_size,
                    };
                    tokio::spawn(conn.handle(stream));
                }
                Err(e) => {
                    tracing::error!("accept failed: {}", e);
                    return;
                }
            }
        }
    }
}

struct Connection {
    engine: ServerHandle,
    security: SecurityRegistry,
    codec: Codec,
    window: Duration,
    max_msg_size: u32,
}

impl Connection {
    /// Run one connection's handshake and, on success, promote it into
    /// the steady-state engine. Every rejection path drops the socket
    /// halves (closing the socket) with all partially gathered state
    /// owned locally, so nothing dangles.
    async fn handle(self, stream: SocketStream) {
        let peer_ident = match stream.peer_identity() {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!("no peer credentials, dropping connection: {}", e);
                return;
            }
        };
        let (mut rd, mut wr) = stream.into_split();

        let hello = match handshake::read_hello(&mut rd, &self.codec, self.window).await {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!("bad hello, dropping connection: {}", e);
                return;
            }
        };

        let info = match self.negotiate(&hello, &peer_ident).await {
            Ok(info) => info,
            Err(e) => {
                tracing::info!("rejecting connection: {}", e);
                // generic status only; no diagnostic for the peer
                let _ = handshake::send_reply(&mut wr, HANDSHAKE_REJECT, None).await;
                return;
            }
        };

        // reserve the arena slot so the reply can carry the index
        let (reply, rx) = oneshot::channel();
        if self
            .engine
            .dispatch(EngineCmd::ReservePeer {
                info: info.clone(),
                compat: hello.compat(),
                reply,
            })
            .is_err()
        {
            return;
        }
        let pindex = match rx.await {
            Ok(Ok(p)) => p,
            _ => {
                let _ = handshake::send_reply(&mut wr, HANDSHAKE_REJECT, None).await;
                return;
            }
        };

        if let Err(e) = handshake::send_reply(&mut wr, HANDSHAKE_OK, Some(pindex)).await {
            tracing::debug!("peer vanished before admission: {}", e);
            let _ = self.engine.dispatch(EngineCmd::PeerLost { pindex });
            return;
        }

        // promote to the steady-state engine
        let (writer, writer_task) = spawn_writer_task(wr);
        let reader_task = tokio::spawn(read_loop(
            rd,
            pindex,
            self.engine.clone(),
            self.max_msg_size,
        ));
        let _ = self.engine.dispatch(EngineCmd::ActivatePeer {
            pindex,
            writer,
            writer_task,
            reader_task,
        });
        tracing::debug!(pindex, peer = %info.id, "peer connected");
    }

    /// Resolve identity, verify assertions, and validate the
    /// credential. Pure validation: allocates no engine state.
    async fn negotiate(&self, hello: &ClientHello, peer_ident: &PeerIdentity) -> Result<PeerInfo> {
        let (id, uid, gid) = match hello.kind {
            PeerKind::Client | PeerKind::ToolClient => {
                let id = hello
                    .id
                    .clone()
                    .ok_or_else(|| ProclinkError::Protocol("missing identity".into()))?;
                // clients must have been registered before connecting
                let (reply, rx) = oneshot::channel();
                self.engine.dispatch(EngineCmd::LookupRegistration {
                    id: id.clone(),
                    reply,
                })?;
                let (uid, gid) = rx
                    .await
                    .map_err(|_| ProclinkError::Unreachable)?
                    .ok_or(ProclinkError::InvalidCredential)?;
                (id, uid, gid)
            }
            PeerKind::ToolGivenId => {
                let id = hello
                    .id
                    .clone()
                    .ok_or_else(|| ProclinkError::Protocol("missing identity".into()))?;
                // a tool may reconnect under the same given identity,
                // but only as the user it first registered as
                let (reply, rx) = oneshot::channel();
                self.engine.dispatch(EngineCmd::LookupRegistration {
                    id: id.clone(),
                    reply,
                })?;
                match rx.await.map_err(|_| ProclinkError::Unreachable)? {
                    Some((uid, _gid)) if uid != hello.uid => {
                        return Err(ProclinkError::InvalidCredential)
                    }
                    Some((uid, gid)) => (id, uid, gid),
                    None => {
                        let (done, rx) = oneshot::channel();
                        self.engine.dispatch(EngineCmd::RegisterClient {
                            id: id.clone(),
                            uid: hello.uid,
                            gid: hello.gid,
                            done,
                        })?;
                        rx.await.map_err(|_| ProclinkError::Unreachable)??;
                        (id, hello.uid, hello.gid)
                    }
                }
            }
            PeerKind::LegacyTool | PeerKind::ToolNeedsId => {
                let (reply, rx) = oneshot::channel();
                self.engine.dispatch(EngineCmd::GenerateToolId {
                    uid: hello.uid,
                    gid: hello.gid,
                    reply,
                })?;
                let id = rx.await.map_err(|_| ProclinkError::Unreachable)?;
                (id, hello.uid, hello.gid)
            }
        };

        // auxiliary assertions must match the identity on file
        let pid = handshake::check_assertions(hello, uid, gid)?;

        let module = self.security.select(&hello.sec_module)?;
        module.validate(peer_ident, &hello.credential)?;

        Ok(PeerInfo {
            id,
            kind: hello.kind,
            uid,
            gid,
            pid,
        })
    }
}

/// Per-peer read loop: pushes socket bytes through the reassembly state
/// machine and forwards complete messages to the engine. Any error
/// other than more-data-needed, and an orderly close, end in the
/// lost-connection path.
async fn read_loop(
    mut rd: tokio::net::unix::OwnedReadHalf,
    pindex: u32,
    engine: ServerHandle,
    max_msg_size: u32,
) {
    let mut reader = MessageReader::with_max_msg_size(max_msg_size);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match rd.read(&mut buf).await {
            Ok(0) => break, // orderly close
            Ok(n) => match reader.push(&buf[..n]) {
                Ok(msgs) => {
                    for msg in msgs {
                        if engine.dispatch(EngineCmd::Inbound { pindex, msg }).is_err() {
                            return; // engine gone; nothing to clean
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(pindex, "fatal inbound framing error: {}", e);
                    break;
                }
            },
            Err(e) => {
                tracing::debug!(pindex, "read error: {}", e);
                break;
            }
        }
    }
    let _ = engine.dispatch(EngineCmd::PeerLost { pindex });
}

// --------------------------------------------------------------------
// Engine
// --------------------------------------------------------------------

struct Engine {
    rx: mpsc::UnboundedReceiver<EngineCmd>,
    /// Arena: slot index is the wire pindex. Slot 0 is the server.
    peers: Vec<Option<PeerSlot>>,
    registrations: HashMap<ProcId, Registration>,
    mux: Multiplexer,
    collectives: Vec<CollectiveTracker>,
    notifications: Vec<(u32, Vec<u8>)>,
    on_lost: Option<LostHandler>,
    host: Option<HostHandler>,
    /// Tags for requests the server addresses to itself.
    self_tags: TagAllocator,
    store: Box<dyn DataStore>,
    tool_counter: u32,
    finalizing: bool,
}

impl Engine {
    fn new(
        rx: mpsc::UnboundedReceiver<EngineCmd>,
        buffer_kind: BufferKind,
        store: Box<dyn DataStore>,
    ) -> Self {
        Self {
            rx,
            peers: vec![None], // slot 0 reserved for self
            registrations: HashMap::new(),
            mux: Multiplexer::new(buffer_kind),
            collectives: Vec::new(),
            notifications: Vec::new(),
            on_lost: None,
            host: None,
            self_tags: TagAllocator::new(crate::protocol::own_dynamic_range()),
            store,
            tool_counter: 0,
            finalizing: false,
        }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            if self.step(cmd) {
                break;
            }
        }
    }

    /// Execute one command; returns true on finalize.
    fn step(&mut self, cmd: EngineCmd) -> bool {
        match cmd {
            EngineCmd::RegisterClient { id, uid, gid, done } => {
                let result = if self.registrations.contains_key(&id) {
                    Err(ProclinkError::BadParam("identity already registered"))
                } else {
                    self.registrations.insert(id, Registration { uid, gid });
                    Ok(())
                };
                let _ = done.send(result);
            }
            EngineCmd::LookupRegistration { id, reply } => {
                let found = self.registrations.get(&id).map(|r| (r.uid, r.gid));
                let _ = reply.send(found);
            }
            EngineCmd::GenerateToolId { uid, gid, reply } => {
                self.tool_counter += 1;
                let id = ProcId::new(format!("proclink-tool-{}", self.tool_counter), 0);
                self.registrations
                    .insert(id.clone(), Registration { uid, gid });
                let _ = reply.send(id);
            }
            EngineCmd::ReservePeer {
                info,
                compat,
                reply,
            } => {
                let _ = reply.send(self.reserve_peer(info, compat));
            }
            EngineCmd::ActivatePeer {
                pindex,
                writer,
                writer_task,
                reader_task,
            } => {
                if let Some(Some(slot)) = self.peers.get_mut(pindex as usize) {
                    slot.writer = Some(writer);
                    slot.writer_task = Some(writer_task);
                    slot.reader_task = Some(reader_task);
                    tracing::debug!(
                        pindex,
                        peer = %slot.info.id,
                        codec = %slot.compat.codec_name,
                        version = %slot.compat.version,
                        "peer active"
                    );
                } else {
                    // reservation vanished underneath the acceptor
                    writer_task.abort();
                    reader_task.abort();
                }
            }
            EngineCmd::Inbound { pindex, msg } => {
                tracing::trace!(pindex, tag = msg.header.tag, nbytes = msg.header.nbytes, "inbound");
                if let Err(e) = self.mux.deliver(msg) {
                    tracing::warn!(pindex, "dropping message: {}", e);
                }
            }
            EngineCmd::PeerLost { pindex } => self.lost_connection(pindex),
            EngineCmd::Send { dest, tag, payload } => self.send_to(dest, tag, payload),
            EngineCmd::SendRecv {
                dest,
                payload,
                handler,
                reply,
            } => {
                let _ = reply.send(self.send_recv(dest, payload, handler));
            }
            EngineCmd::PostRecv { tag, handler } => self.mux.post(tag, handler),
            EngineCmd::BeginCollective {
                kind,
                participants,
                nlocal,
                local_only,
                callback,
            } => {
                self.collectives.push(CollectiveTracker::new(
                    kind,
                    participants,
                    nlocal,
                    local_only,
                    callback,
                ));
            }
            EngineCmd::CollectiveArrived {
                kind,
                participants,
                pindex,
                reply_tag,
            } => self.collective_arrived(kind, &participants, pindex, reply_tag),
            EngineCmd::HostCollectiveComplete {
                kind,
                participants,
                status,
            } => {
                if let Some(trk) = self
                    .collectives
                    .iter_mut()
                    .find(|t| t.kind == kind && t.participants == participants && t.host_called)
                {
                    trk.resolve(status);
                }
                self.collectives.retain(|t| !t.is_resolved());
            }
            EngineCmd::CacheNotification { pindex, payload } => {
                self.notifications.push((pindex, payload));
            }
            EngineCmd::StoreRecord { source, info } => self.store.store(&source, info),
            EngineCmd::FetchRecord { source, key, reply } => {
                let _ = reply.send(self.store.fetch(&source, &key));
            }
            EngineCmd::PurgeRecords { source } => self.store.purge(&source),
            EngineCmd::SetLostHandler { handler } => self.on_lost = Some(handler),
            EngineCmd::SetHostHandler { handler } => self.host = Some(handler),
            EngineCmd::Stats { reply } => {
                let _ = reply.send(EngineStats {
                    peers: self.peers.iter().filter(|p| p.is_some()).count(),
                    registrations: self.registrations.len(),
                    posted_recvs: self.mux.posted_count(),
                    collectives: self.collectives.len(),
                    notifications: self.notifications.len(),
                });
            }
            EngineCmd::Finalize { done } => {
                self.finalizing = true;
                let indices: Vec<u32> = (0..self.peers.len() as u32).collect();
                for pindex in indices {
                    self.lost_connection(pindex);
                }
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    fn reserve_peer(&mut self, info: PeerInfo, compat: PeerCompat) -> Result<u32> {
        let slot = PeerSlot {
            info,
            compat,
            writer: None,
            writer_task: None,
            reader_task: None,
            tags: TagAllocator::new(peer_dynamic_range()),
        };
        // reuse a free slot before growing the arena
        for (i, entry) in self.peers.iter_mut().enumerate().skip(1) {
            if entry.is_none() {
                *entry = Some(slot);
                return Ok(i as u32);
            }
        }
        self.peers.push(Some(slot));
        Ok((self.peers.len() - 1) as u32)
    }

    fn send_to(&mut self, dest: u32, tag: u32, payload: Vec<u8>) {
        let header = Header::new(SELF_PINDEX, tag, payload.len() as u32);
        if dest == SELF_PINDEX {
            // self-delivery bypasses the socket entirely
            if let Err(e) = self.mux.deliver(Message { header, payload }) {
                tracing::warn!("self-delivery dropped: {}", e);
            }
            return;
        }
        match self.peers.get(dest as usize).and_then(|s| s.as_ref()) {
            Some(slot) => {
                let writer = match &slot.writer {
                    Some(w) => w.clone(),
                    None => {
                        tracing::warn!(dest, "send to peer still in handshake, dropped");
                        return;
                    }
                };
                if writer
                    .send(PendingSend::new(&header, Bytes::from(payload)))
                    .is_err()
                {
                    // writer task died: connection-fatal
                    self.lost_connection(dest);
                }
            }
            None => tracing::warn!(dest, "send to unknown peer dropped"),
        }
    }

    fn send_recv(&mut self, dest: u32, payload: Vec<u8>, handler: RecvHandler) -> Result<u32> {
        let tag = if dest == SELF_PINDEX {
            self.self_tags.next()
        } else {
            let slot = self
                .peers
                .get_mut(dest as usize)
                .and_then(|s| s.as_mut())
                .ok_or(ProclinkError::Unreachable)?;
            slot.tags.next()
        };
        self.mux.post(tag, handler);
        self.send_to(dest, tag, payload);
        Ok(tag)
    }

    fn collective_arrived(
        &mut self,
        kind: CollectiveKind,
        participants: &[ProcId],
        pindex: u32,
        reply_tag: u32,
    ) {
        let Some(trk) = self
            .collectives
            .iter_mut()
            .find(|t| t.kind == kind && t.participants == participants)
        else {
            tracing::warn!(?kind, "arrival for unknown collective");
            return;
        };
        trk.arrive(pindex, reply_tag);
        if trk.locally_complete() && !trk.host_called {
            if trk.local_only {
                trk.resolve(trk.status);
            } else {
                trk.host_called = true;
                if let Some(host) = &self.host {
                    host(trk.kind, trk.participants.clone(), trk.status);
                }
            }
        }
        self.collectives.retain(|t| !t.is_resolved());
    }

    /// Lost-connection path: deregister watchers, discard in-flight
    /// I/O state, close the socket, then repair everything that
    /// referenced the peer.
    fn lost_connection(&mut self, pindex: u32) {
        let Some(slot) = self
            .peers
            .get_mut(pindex as usize)
            .and_then(|entry| entry.take())
        else {
            return;
        };
        // stop the I/O tasks; dropping them closes the socket halves
        // and discards the partial receive and queued sends
        if let Some(t) = slot.reader_task {
            t.abort();
        }
        if let Some(t) = slot.writer_task {
            t.abort();
        }
        drop(slot.writer);

        let id = slot.info.id.clone();
        tracing::info!(pindex, peer = %id, "lost connection");

        // adjust every collective this peer was participating in
        for trk in &mut self.collectives {
            if !trk.involves(&id) || trk.host_called {
                continue;
            }
            let status = trk.lose_participant(pindex);
            if trk.locally_complete() {
                if trk.local_only {
                    trk.resolve(status);
                } else {
                    // hand up to the host so the global op can't hang
                    trk.host_called = true;
                    if let Some(host) = &self.host {
                        host(trk.kind, trk.participants.clone(), status);
                    }
                }
            }
        }
        self.collectives.retain(|t| !t.is_resolved());

        // purge cached notifications for the peer
        self.notifications.retain(|(idx, _)| *idx != pindex);

        // raise the event unless this process is on its way out
        if !self.finalizing {
            if let Some(cb) = &self.on_lost {
                cb(id);
            }
        }
    }
}
