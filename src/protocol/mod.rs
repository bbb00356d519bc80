//! Wire protocol: header framing, receive accumulation, send engine.
//!
//! - [`wire`]: the 12-byte {pindex, tag, nbytes} header and tag-space
//!   layout
//! - [`reader`]: state machine reassembling messages from partial
//!   socket reads
//! - [`writer`]: pending sends with vectored partial-write resume and
//!   the per-peer writer task

pub mod reader;
pub mod wire;
pub mod writer;

pub use reader::{Message, MessageReader};
pub use wire::{
    own_dynamic_range, peer_dynamic_range, Header, DEFAULT_MAX_MSG_SIZE, HEADER_SIZE,
    PINDEX_UNASSIGNED, TAG_DYNAMIC, TAG_HANDSHAKE, TAG_WILDCARD,
};
pub use writer::{spawn_writer_task, write_pending, PendingSend, WriterHandle};
