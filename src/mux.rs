//! Tag multiplexer: posted receives, dynamic tag allocation,
//! unexpected-message buffering.
//!
//! A posted receive registers a handler for a tag. Tags below
//! [`TAG_DYNAMIC`](crate::protocol::TAG_DYNAMIC) are persistent
//! subscriptions; dynamic tags are one-shot and retire when their reply
//! is delivered. A receive posted on the wildcard tag sees every
//! otherwise-unmatched sub-threshold message. Messages arriving on a
//! sub-threshold tag with no receive posted are buffered until one is;
//! an unsolicited message on a dynamic tag is a protocol error, since
//! the peer never sends replies that were not requested.

use crate::buffer::{Buffer, BufferKind};
use crate::error::{ProclinkError, Result};
use crate::protocol::{Header, Message, TAG_DYNAMIC, TAG_WILDCARD};

/// What a posted receive is handed: the wire header plus either the
/// payload loaded into a buffer, or the error that synthetically failed
/// the receive (lost connection).
pub struct RecvEvent {
    pub header: Header,
    pub payload: Result<Buffer>,
}

/// Handler invoked when a posted receive fires. One-shot handlers are
/// removed after firing; persistent handlers stay registered.
pub type RecvHandler = Box<dyn FnMut(RecvEvent) + Send>;

struct PostedRecv {
    tag: u32,
    handler: RecvHandler,
}

/// Allocator cycling through a half-open dynamic tag range.
///
/// Tags wrap after exhausting the range; this is safe because each tag
/// retires when its reply is delivered, so the range size bounds the
/// number of concurrently outstanding requests per peer. The range end
/// itself is never produced, which keeps the wildcard tag unallocatable.
#[derive(Debug, Clone)]
pub struct TagAllocator {
    start: u32,
    end: u32,
    current: u32,
}

impl TagAllocator {
    /// Allocator over `[start, end)`, yielding `start + 1` first.
    pub fn new((start, end): (u32, u32)) -> Self {
        Self {
            start,
            end,
            current: start,
        }
    }

    /// Take the next tag in the sequence.
    pub fn next(&mut self) -> u32 {
        self.current += 1;
        if self.current == self.end {
            self.current = self.start;
        }
        self.current
    }
}

/// Posted-receive table correlating inbound messages to handlers.
pub struct Multiplexer {
    posted: Vec<PostedRecv>,
    unexpected: Vec<Message>,
    buffer_kind: BufferKind,
}

impl Multiplexer {
    /// Table delivering payloads as buffers of the given kind (the
    /// peer's negotiated kind).
    pub fn new(buffer_kind: BufferKind) -> Self {
        Self {
            posted: Vec::new(),
            unexpected: Vec::new(),
            buffer_kind,
        }
    }

    /// Register a receive for `tag`.
    ///
    /// If a matching message already arrived it is delivered
    /// immediately; a dynamic (one-shot) receive satisfied this way is
    /// not registered at all.
    pub fn post(&mut self, tag: u32, mut handler: RecvHandler) {
        while let Some(pos) = self
            .unexpected
            .iter()
            .position(|m| m.header.tag == tag || tag == TAG_WILDCARD)
        {
            let msg = self.unexpected.remove(pos);
            tracing::debug!(tag = msg.header.tag, "delivering buffered unexpected message");
            let header = msg.header;
            handler(RecvEvent {
                header,
                payload: Ok(Buffer::load(msg.payload, self.buffer_kind)),
            });
            if is_dynamic(tag) {
                return; // one-shot, consumed by the buffered message
            }
        }
        self.posted.push(PostedRecv { tag, handler });
    }

    /// Route a reassembled message to its posted receive.
    ///
    /// An exact tag match wins over the wildcard. Messages on
    /// sub-threshold tags with no receive posted are buffered; an
    /// unsolicited dynamic tag is a protocol error.
    pub fn deliver(&mut self, msg: Message) -> Result<()> {
        let tag = msg.header.tag;
        let slot = self
            .posted
            .iter()
            .position(|r| r.tag == tag)
            .or_else(|| self.posted.iter().position(|r| r.tag == TAG_WILDCARD));

        if let Some(pos) = slot {
            let event = RecvEvent {
                header: msg.header,
                payload: Ok(Buffer::load(msg.payload, self.buffer_kind)),
            };
            if is_dynamic(self.posted[pos].tag) {
                // retire before invoking so the handler may repost
                let mut recv = self.posted.remove(pos);
                (recv.handler)(event);
            } else {
                (self.posted[pos].handler)(event);
            }
            return Ok(());
        }

        if is_dynamic(tag) {
            tracing::warn!(tag, pindex = msg.header.pindex, "unexpected message on dynamic tag");
            return Err(ProclinkError::Protocol(format!(
                "unexpected message on dynamic tag {}",
                tag
            )));
        }

        // someone may post a receive for this later, so hold onto it
        self.unexpected.push(msg);
        Ok(())
    }

    /// Synthetically fail every outstanding dynamic-tag receive.
    ///
    /// Invoked when the connection is lost: the replies those receives
    /// were waiting for will never arrive, and this is the sole
    /// unblocking mechanism.
    pub fn fail_outstanding_dynamic(&mut self) {
        let mut i = 0;
        while i < self.posted.len() {
            if is_dynamic(self.posted[i].tag) {
                let mut recv = self.posted.remove(i);
                (recv.handler)(RecvEvent {
                    header: Header::new(0, recv.tag, 0),
                    payload: Err(ProclinkError::LostConnection),
                });
            } else {
                i += 1;
            }
        }
    }

    /// Number of receives currently posted.
    pub fn posted_count(&self) -> usize {
        self.posted.len()
    }

    /// Number of buffered unexpected messages.
    pub fn unexpected_count(&self) -> usize {
        self.unexpected.len()
    }
}

fn is_dynamic(tag: u32) -> bool {
    tag >= TAG_DYNAMIC && tag != TAG_WILDCARD
}
