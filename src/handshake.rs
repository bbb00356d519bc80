//! Connection handshake: the bounded exchange that authenticates and
//! negotiates a peer before it is admitted to the steady-state engine.
//!
//! The connecting side sends one framed hello:
//!
//! ```text
//! security module name  (NUL-terminated)
//! credential            (u32 length + opaque bytes)
//! connection kind       (1 byte, selects the identity fields)
//!   Client                       → nspace + rank
//!   LegacyTool / ToolNeedsId     → uid + gid
//!   ToolGivenId / ToolClient     → uid + gid + nspace + rank
//! version               (NUL-terminated, e.g. "2.1")
//! -- current versions only --
//! codec name            (NUL-terminated)
//! buffer kind           (1 byte)
//! data-store name       (NUL-terminated)
//! info blob             (rest of payload, codec-encoded assertions)
//! ```
//!
//! The acceptor answers with a u32 status and, on success, the u32 peer
//! index it assigned. Rejections carry the generic status only; no
//! structured diagnostic reaches an unauthenticated peer. The whole
//! exchange is bounded in size and time; only after it completes is the
//! socket handed to the nonblocking engine.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::buffer::{Buffer, BufferKind};
use crate::codec::{ids, Codec, InfoPair, ProcId, Value};
use crate::error::{ProclinkError, Result};
use crate::peer::{PeerCompat, PeerKind};
use crate::protocol::{Header, HEADER_SIZE, PINDEX_UNASSIGNED, TAG_HANDSHAKE};

/// Protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "2.1";

/// Hard ceiling on a hello payload; guards the acceptor against
/// garbage or hostile connectors.
pub const MAX_HELLO_SIZE: u32 = 64 * 1024;

/// Time budget for the whole handshake exchange on one socket.
pub const DEFAULT_HANDSHAKE_WINDOW: Duration = Duration::from_secs(2);

/// Reply status: admitted.
pub const HANDSHAKE_OK: u32 = 0;
/// Reply status: rejected, no further detail.
pub const HANDSHAKE_REJECT: u32 = 1;

/// Keys used in the hello's auxiliary-assertion info blob.
pub mod keys {
    /// Pid of the connecting process.
    pub const PID: &str = "proclink.pid";
    /// Claimed effective uid; must match the registered uid.
    pub const USERID: &str = "proclink.uid";
    /// Claimed effective gid; must match the registered gid.
    pub const GRPID: &str = "proclink.gid";
    /// Real (not effective) uid, recorded as-is.
    pub const REALUID: &str = "proclink.realuid";
    /// Real gid, recorded as-is.
    pub const REALGID: &str = "proclink.realgid";
}

/// Decoded hello payload.
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub sec_module: String,
    pub credential: Vec<u8>,
    pub kind: PeerKind,
    /// uid/gid fields; present for the tool kinds.
    pub uid: u32,
    pub gid: u32,
    /// Explicit identity; present when the kind carries one.
    pub id: Option<ProcId>,
    pub version: String,
    pub codec_name: String,
    pub buffer_kind: BufferKind,
    pub store_name: String,
    /// Auxiliary identity assertions.
    pub assertions: Vec<InfoPair>,
}

impl ClientHello {
    /// Hello for a registered client process.
    pub fn client(sec_module: &str, credential: Vec<u8>, id: ProcId) -> Self {
        Self {
            sec_module: sec_module.to_string(),
            credential,
            kind: PeerKind::Client,
            uid: current_uid(),
            gid: current_gid(),
            id: Some(id),
            version: PROTOCOL_VERSION.to_string(),
            codec_name: "builtin".to_string(),
            buffer_kind: BufferKind::FullyDescribed,
            store_name: "hash".to_string(),
            assertions: Vec::new(),
        }
    }

    /// Hello for a tool, with or without a caller-given identity.
    pub fn tool(sec_module: &str, credential: Vec<u8>, id: Option<ProcId>) -> Self {
        Self {
            kind: match id {
                Some(_) => PeerKind::ToolGivenId,
                None => PeerKind::ToolNeedsId,
            },
            id,
            ..Self::client(sec_module, credential, ProcId::new("", 0))
        }
    }

    /// Attach the standard identity assertions (pid, real uid/gid).
    pub fn with_self_assertions(mut self) -> Self {
        self.assertions = vec![
            InfoPair::new(keys::PID, Value::Uint32(std::process::id())),
            InfoPair::new(keys::USERID, Value::Uint32(self.uid)),
            InfoPair::new(keys::GRPID, Value::Uint32(self.gid)),
            InfoPair::new(keys::REALUID, Value::Uint32(current_real_uid())),
            InfoPair::new(keys::REALGID, Value::Uint32(current_real_gid())),
        ];
        self
    }

    /// True for the 2.0 wire variant whose hello ends at the version.
    pub fn is_legacy(&self) -> bool {
        self.version.starts_with("2.0")
    }

    /// Encode the hello payload.
    pub fn encode(&self, codec: &Codec) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        put_cstr(&mut out, &self.sec_module);
        out.extend_from_slice(&(self.credential.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.credential);
        out.push(self.kind.to_wire());

        if self.kind.is_tool() {
            out.extend_from_slice(&self.uid.to_be_bytes());
            out.extend_from_slice(&self.gid.to_be_bytes());
        }
        if self.kind.carries_identity() {
            let id = self
                .id
                .as_ref()
                .ok_or(ProclinkError::BadParam("connection kind requires identity"))?;
            put_cstr(&mut out, &id.nspace);
            out.extend_from_slice(&id.rank.to_be_bytes());
        }

        put_cstr(&mut out, &self.version);
        if !self.is_legacy() {
            put_cstr(&mut out, &self.codec_name);
            out.push(self.buffer_kind.to_wire());
            put_cstr(&mut out, &self.store_name);
            if !self.assertions.is_empty() {
                let mut blob = Buffer::new(self.buffer_kind);
                codec.pack(
                    &mut blob,
                    &[Value::Uint32(self.assertions.len() as u32)],
                    ids::UINT32,
                )?;
                for info in &self.assertions {
                    codec.pack(&mut blob, &[Value::Info(info.clone())], ids::INFO)?;
                }
                out.extend_from_slice(&blob.unload());
            }
        }
        Ok(out)
    }

    /// Parse a hello payload.
    pub fn parse(payload: &[u8], codec: &Codec) -> Result<Self> {
        let mut cur = Cursor::new(payload);
        let sec_module = cur.read_cstr()?;
        let cred_len = cur.read_u32()? as usize;
        let credential = cur.read_exact(cred_len)?.to_vec();
        let kind = PeerKind::from_wire(cur.read_u8()?)?;

        let (mut uid, mut gid) = (0, 0);
        if kind.is_tool() {
            uid = cur.read_u32()?;
            gid = cur.read_u32()?;
        }
        let id = if kind.carries_identity() {
            let nspace = cur.read_cstr()?;
            let rank = cur.read_u32()?;
            Some(ProcId::new(nspace, rank))
        } else {
            None
        };

        let version = cur.read_cstr()?;
        let mut hello = Self {
            sec_module,
            credential,
            kind,
            uid,
            gid,
            id,
            version: version.clone(),
            codec_name: String::new(),
            buffer_kind: BufferKind::FullyDescribed,
            store_name: String::new(),
            assertions: Vec::new(),
        };

        if hello.is_legacy() {
            let compat = PeerCompat::legacy(&version);
            hello.codec_name = compat.codec_name;
            hello.buffer_kind = compat.buffer_kind;
            hello.store_name = compat.store_name;
            return Ok(hello);
        }

        hello.codec_name = cur.read_cstr()?;
        hello.buffer_kind = BufferKind::from_wire(cur.read_u8()?)?;
        hello.store_name = cur.read_cstr()?;

        let rest = cur.rest();
        if !rest.is_empty() {
            let mut blob = Buffer::load(rest.to_vec(), hello.buffer_kind);
            let count = match codec.unpack_one(&mut blob, ids::UINT32)? {
                Value::Uint32(n) => n as usize,
                _ => return Err(ProclinkError::Protocol("malformed assertion blob".into())),
            };
            for _ in 0..count {
                match codec.unpack_one(&mut blob, ids::INFO)? {
                    Value::Info(info) => hello.assertions.push(info),
                    _ => return Err(ProclinkError::Protocol("malformed assertion blob".into())),
                }
            }
        }
        Ok(hello)
    }

    /// Negotiated parameters this hello selects.
    pub fn compat(&self) -> PeerCompat {
        PeerCompat {
            version: self.version.clone(),
            codec_name: self.codec_name.clone(),
            buffer_kind: self.buffer_kind,
            store_name: self.store_name.clone(),
        }
    }
}

/// Check the hello's auxiliary assertions against the identity on file.
///
/// A claimed uid or gid differing from the registration is a hard
/// [`ProclinkError::InvalidCredential`]. Returns the asserted pid when
/// present.
pub fn check_assertions(hello: &ClientHello, on_file_uid: u32, on_file_gid: u32) -> Result<Option<u32>> {
    let mut pid = None;
    for info in &hello.assertions {
        match (info.key.as_str(), info.value.as_ref()) {
            (keys::PID, Value::Uint32(p)) => pid = Some(*p),
            (keys::USERID, Value::Uint32(claimed)) => {
                if *claimed != on_file_uid {
                    tracing::warn!(claimed, on_file_uid, "uid assertion mismatch");
                    return Err(ProclinkError::InvalidCredential);
                }
            }
            (keys::GRPID, Value::Uint32(claimed)) => {
                if *claimed != on_file_gid {
                    tracing::warn!(claimed, on_file_gid, "gid assertion mismatch");
                    return Err(ProclinkError::InvalidCredential);
                }
            }
            // real uid/gid are recorded facts, not checked claims
            (keys::REALUID, _) | (keys::REALGID, _) => {}
            _ => {}
        }
    }
    Ok(pid)
}

// --------------------------------------------------------------------
// Framed exchange helpers
// --------------------------------------------------------------------

/// Send a framed hello.
pub async fn send_hello<W>(sock: &mut W, hello: &ClientHello, codec: &Codec) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = hello.encode(codec)?;
    let header = Header::new(PINDEX_UNASSIGNED, TAG_HANDSHAKE, payload.len() as u32);
    sock.write_all(&header.encode()).await?;
    sock.write_all(&payload).await?;
    sock.flush().await?;
    Ok(())
}

/// Read a framed hello within the bounded window.
pub async fn read_hello<R>(sock: &mut R, codec: &Codec, window: Duration) -> Result<ClientHello>
where
    R: AsyncRead + Unpin,
{
    let payload = timeout(window, async {
        let mut hdr = [0u8; HEADER_SIZE];
        sock.read_exact(&mut hdr).await?;
        let header = Header::decode(&hdr).expect("exact-size header read");
        if header.nbytes > MAX_HELLO_SIZE {
            return Err(ProclinkError::Protocol(format!(
                "hello of {} bytes exceeds limit",
                header.nbytes
            )));
        }
        let mut payload = vec![0u8; header.nbytes as usize];
        sock.read_exact(&mut payload).await?;
        Ok(payload)
    })
    .await
    .map_err(|_| ProclinkError::Protocol("handshake timed out".into()))??;

    ClientHello::parse(&payload, codec)
}

/// Send the acceptor's verdict: status, then the assigned index on
/// success.
pub async fn send_reply<W>(sock: &mut W, status: u32, pindex: Option<u32>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    sock.write_all(&status.to_be_bytes()).await?;
    if let Some(idx) = pindex {
        sock.write_all(&idx.to_be_bytes()).await?;
    }
    sock.flush().await?;
    Ok(())
}

/// Read the acceptor's verdict; a rejection surfaces only as
/// [`ProclinkError::InvalidCredential`].
pub async fn read_reply<R>(sock: &mut R, window: Duration) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    timeout(window, async {
        let mut word = [0u8; 4];
        sock.read_exact(&mut word).await?;
        if u32::from_be_bytes(word) != HANDSHAKE_OK {
            return Err(ProclinkError::InvalidCredential);
        }
        sock.read_exact(&mut word).await?;
        Ok(u32::from_be_bytes(word))
    })
    .await
    .map_err(|_| ProclinkError::Protocol("handshake timed out".into()))?
}

fn put_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(ProclinkError::Protocol("truncated hello".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_exact(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProclinkError::Protocol("unterminated string in hello".into()))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ProclinkError::Protocol("invalid UTF-8 in hello".into()))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

fn current_uid() -> u32 {
    #[cfg(unix)]
    unsafe {
        libc::geteuid()
    }
    #[cfg(not(unix))]
    0
}

fn current_gid() -> u32 {
    #[cfg(unix)]
    unsafe {
        libc::getegid()
    }
    #[cfg(not(unix))]
    0
}

fn current_real_uid() -> u32 {
    #[cfg(unix)]
    unsafe {
        libc::getuid()
    }
    #[cfg(not(unix))]
    0
}

fn current_real_gid() -> u32 {
    #[cfg(unix)]
    unsafe {
        libc::getgid()
    }
    #[cfg(not(unix))]
    0
}
