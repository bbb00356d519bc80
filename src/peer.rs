//! Peer descriptions shared by the acceptor and the engines.

use crate::buffer::BufferKind;
use crate::codec::ProcId;
use crate::error::{ProclinkError, Result};

/// Connection-kind flag carried in the handshake, selecting which
/// identity fields follow it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Registered client process: full nspace+rank identity.
    Client,
    /// Legacy tool: uid/gid only, server generates an identity.
    LegacyTool,
    /// Tool that needs a server-generated identity.
    ToolNeedsId,
    /// Tool connecting with a caller-given identity.
    ToolGivenId,
    /// Tool that is itself a registered client.
    ToolClient,
}

impl PeerKind {
    /// Wire flag byte.
    pub fn to_wire(self) -> u8 {
        match self {
            PeerKind::Client => 0,
            PeerKind::LegacyTool => 1,
            PeerKind::ToolNeedsId => 2,
            PeerKind::ToolGivenId => 3,
            PeerKind::ToolClient => 4,
        }
    }

    /// Parse the wire flag byte; an unknown kind is `NotSupported`.
    pub fn from_wire(b: u8) -> Result<Self> {
        match b {
            0 => Ok(PeerKind::Client),
            1 => Ok(PeerKind::LegacyTool),
            2 => Ok(PeerKind::ToolNeedsId),
            3 => Ok(PeerKind::ToolGivenId),
            4 => Ok(PeerKind::ToolClient),
            other => Err(ProclinkError::NotSupported(other)),
        }
    }

    /// True for the tool family (identity may be generated).
    pub fn is_tool(self) -> bool {
        !matches!(self, PeerKind::Client)
    }

    /// True when the handshake carries an explicit nspace+rank.
    pub fn carries_identity(self) -> bool {
        matches!(
            self,
            PeerKind::Client | PeerKind::ToolGivenId | PeerKind::ToolClient
        )
    }
}

/// Communication parameters negotiated during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCompat {
    /// Protocol version string the peer announced.
    pub version: String,
    /// Codec variant name (selects the type-registry flavor).
    pub codec_name: String,
    /// Whether the peer's buffers are self-describing.
    pub buffer_kind: BufferKind,
    /// Data-store module the peer selected.
    pub store_name: String,
}

impl PeerCompat {
    /// Defaults applied to 2.0-era peers whose handshake ends at the
    /// version string.
    pub fn legacy(version: &str) -> Self {
        Self {
            version: version.to_string(),
            codec_name: "v20".to_string(),
            buffer_kind: BufferKind::FullyDescribed,
            store_name: "hash".to_string(),
        }
    }
}

/// Identity facts for an admitted peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Namespace + rank.
    pub id: ProcId,
    /// Kind admitted under.
    pub kind: PeerKind,
    /// Registered uid.
    pub uid: u32,
    /// Registered gid.
    pub gid: u32,
    /// Pid asserted in the handshake info blob, when given.
    pub pid: Option<u32>,
}
