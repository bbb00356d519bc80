//! # proclink
//!
//! Node-local runtime substrate for process-management interfaces: the
//! wire-protocol core used by job launchers, resource managers, and
//! parallel-runtime libraries to exchange job/process metadata between
//! cooperating processes on a node over a private Unix-domain-socket
//! protocol. One local [`Server`] serves many [`Client`] processes.
//!
//! ## Architecture
//!
//! - **Codec plane**: a self-describing binary
//!   pack/unpack/copy/compare/print engine over an open, registrable
//!   set of data types ([`codec`], [`buffer`]).
//! - **Transport plane**: framing, tag-based request/reply
//!   multiplexing, credential handshake, and connection-loss recovery
//!   over Unix sockets ([`protocol`], [`mux`], [`handshake`],
//!   [`server`], [`client`]).
//!
//! The transport's payload *is* the codec's byte encoding: buffers are
//! packed, unloaded into a framed message, reassembled across partial
//! reads on the far side, and loaded back for unpacking. Ownership
//! moves with the bytes at every boundary.
//!
//! ## Example
//!
//! ```ignore
//! use proclink::buffer::{Buffer, BufferKind};
//! use proclink::codec::{Codec, InfoPair, Value, ids};
//!
//! let codec = Codec::with_builtins();
//! let mut buf = Buffer::new(BufferKind::FullyDescribed);
//! let record = Value::Info(InfoPair::new("foo", Value::Uint32(42)));
//! codec.pack(&mut buf, &[record], ids::INFO)?;
//! // hand buf.unload() to a send, or unpack it right back
//! ```

pub mod buffer;
pub mod client;
pub mod codec;
pub mod collective;
pub mod error;
pub mod handshake;
pub mod mux;
pub mod peer;
pub mod protocol;
pub mod security;
pub mod server;
pub mod store;
pub mod transport;

pub use buffer::{Buffer, BufferKind};
pub use client::{Client, ClientConfig};
pub use codec::{Codec, CompareResult, ProcId, Value};
pub use error::{ProclinkError, Result};
pub use server::{Server, ServerConfig, ServerHandle};
