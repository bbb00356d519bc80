//! Wire header encoding and tag-space layout.
//!
//! Every message is framed by a fixed 12-byte header:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ pindex   │ tag      │ nbytes   │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │
//! │ u32 BE   │ u32 BE   │ u32 BE   │
//! └──────────┴──────────┴──────────┘
//! ```
//! `pindex` is the sender's slot in the server's peer table, `tag`
//! correlates replies with requests or routes to a persistent
//! subscription, and `nbytes` is the payload length (0 = header-only).

use crate::error::{ProclinkError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Default maximum payload size (256 MB). A header announcing more is
/// connection-fatal: it indicates a corrupt or hostile peer.
pub const DEFAULT_MAX_MSG_SIZE: u32 = 256 * 1024 * 1024;

/// Peer index used by a client before the server assigns one.
pub const PINDEX_UNASSIGNED: u32 = u32::MAX;

/// Tags below this mark are persistent, server-assigned subscriptions;
/// tags at or above it are dynamic request/reply tags.
pub const TAG_DYNAMIC: u32 = 100;

/// Wildcard for a posted receive that catches unsolicited messages.
/// Never allocated as a dynamic tag.
pub const TAG_WILDCARD: u32 = u32::MAX;

/// Tag carried by the handshake exchange itself.
pub const TAG_HANDSHAKE: u32 = 0;

/// Dynamic-tag range handed to each connected peer by the server
/// (upper half of the dynamic space).
pub fn peer_dynamic_range() -> (u32, u32) {
    let start = TAG_DYNAMIC + (u32::MAX - TAG_DYNAMIC) / 2 + 1;
    (start, u32::MAX)
}

/// Dynamic-tag range the connecting side keeps for its own requests
/// (lower half of the dynamic space).
pub fn own_dynamic_range() -> (u32, u32) {
    (TAG_DYNAMIC, TAG_DYNAMIC + (u32::MAX - TAG_DYNAMIC) / 2)
}

/// Decoded wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender's peer-table index.
    pub pindex: u32,
    /// Reply-correlation or subscription tag.
    pub tag: u32,
    /// Payload length; 0 denotes a header-only message.
    pub nbytes: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(pindex: u32, tag: u32, nbytes: u32) -> Self {
        Self {
            pindex,
            tag,
            nbytes,
        }
    }

    /// Encode to network byte order.
    ///
    /// # Example
    ///
    /// ```
    /// use proclink::protocol::{Header, HEADER_SIZE};
    ///
    /// let bytes = Header::new(3, 77, 10).encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.pindex.to_be_bytes());
        buf[4..8].copy_from_slice(&self.tag.to_be_bytes());
        buf[8..12].copy_from_slice(&self.nbytes.to_be_bytes());
        buf
    }

    /// Decode from network byte order. Returns `None` if the slice is
    /// too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            pindex: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            tag: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            nbytes: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Enforce the payload-size ceiling.
    pub fn validate(&self, max_msg_size: u32) -> Result<()> {
        if self.nbytes > max_msg_size {
            return Err(ProclinkError::Protocol(format!(
                "message size {} exceeds maximum {}",
                self.nbytes, max_msg_size
            )));
        }
        Ok(())
    }

    /// True for header-only messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nbytes == 0
    }

    /// True for tags in the dynamic request/reply space.
    #[inline]
    pub fn is_dynamic_tag(&self) -> bool {
        self.tag >= TAG_DYNAMIC && self.tag != TAG_WILDCARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let original = Header::new(3, 77, 1024);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_network_byte_order() {
        let header = Header::new(0x01020304, 0x05060708, 0x090A0B0C);
        let bytes = header.encode();
        assert_eq!(
            bytes,
            [
                0x01, 0x02, 0x03, 0x04, // pindex
                0x05, 0x06, 0x07, 0x08, // tag
                0x09, 0x0A, 0x0B, 0x0C, // nbytes
            ]
        );
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(Header::decode(&[0u8; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn test_validate_size_ceiling() {
        let header = Header::new(0, 5, 1000);
        assert!(header.validate(1000).is_ok());
        assert!(header.validate(999).is_err());
    }

    #[test]
    fn test_tag_space_layout() {
        let (pstart, pend) = peer_dynamic_range();
        let (ostart, oend) = own_dynamic_range();
        // the two halves partition the dynamic space
        assert_eq!(ostart, TAG_DYNAMIC);
        assert_eq!(oend + 1, pstart);
        assert_eq!(pend, u32::MAX);
        // reserved subscription space lies below both
        assert!(TAG_HANDSHAKE < TAG_DYNAMIC);
    }

    #[test]
    fn test_dynamic_tag_classification() {
        assert!(!Header::new(0, 5, 0).is_dynamic_tag());
        assert!(Header::new(0, TAG_DYNAMIC, 0).is_dynamic_tag());
        assert!(!Header::new(0, TAG_WILDCARD, 0).is_dynamic_tag());
    }
}
