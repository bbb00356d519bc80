//! Error types for proclink.

use thiserror::Error;

/// Main error type for all proclink operations.
#[derive(Debug, Error)]
pub enum ProclinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An argument failed validation (zero type id, empty name, ...).
    #[error("bad parameter: {0}")]
    BadParam(&'static str),

    /// No type registered under the given id.
    #[error("unknown data type: {0}")]
    UnknownDataType(u16),

    /// A type with this id or name is already registered.
    #[error("data type already registered: {0}")]
    DuplicateType(String),

    /// Unpack ran off the end of the buffer. Often a normal
    /// "no more data" signal rather than corruption.
    #[error("read past end of buffer")]
    ReadPastEndOfBuffer,

    /// The stored type cannot be converted to the requested type.
    #[error("type mismatch: requested {requested}, stored {stored}")]
    TypeMismatch { requested: u16, stored: u16 },

    /// Allocation or table-slot exhaustion.
    #[error("out of resource")]
    OutOfResource,

    /// Socket error or closed connection.
    #[error("peer unreachable")]
    Unreachable,

    /// Credential rejected during the handshake.
    #[error("invalid credential")]
    InvalidCredential,

    /// Unknown connection-kind flag in a handshake.
    #[error("unsupported connection kind: {0}")]
    NotSupported(u8),

    /// The connection to the peer was lost; pending operations
    /// were synthetically failed.
    #[error("lost connection")]
    LostConnection,

    /// Wire-level protocol violation (oversized message, unsolicited
    /// dynamic tag, malformed handshake, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using ProclinkError.
pub type Result<T> = std::result::Result<T, ProclinkError>;
