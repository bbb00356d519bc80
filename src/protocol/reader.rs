//! Receive-side accumulator for partial reads.
//!
//! State machine for reassembling messages from a nonblocking socket:
//! - `AwaitingHeader`: accumulating the fixed 12-byte header
//! - `AwaitingBody`: header decoded, filling a payload region of
//!   exactly `nbytes`
//!
//! Bytes arrive in whatever chunks the socket produces; `push` consumes
//! them and yields every completed message. Splitting the input across
//! any number of short reads produces byte-identical results to a
//! single uninterrupted read.

use super::wire::{Header, DEFAULT_MAX_MSG_SIZE, HEADER_SIZE};
use crate::error::{ProclinkError, Result};

/// A fully reassembled inbound message. The payload is an owned region
/// ready to be loaded into a buffer without copying.
#[derive(Debug)]
pub struct Message {
    /// Header, already converted to host values.
    pub header: Header,
    /// Payload bytes; empty for header-only messages.
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    AwaitingBody { header: Header, payload: Vec<u8> },
}

/// Accumulator turning a byte stream into complete messages.
#[derive(Debug)]
pub struct MessageReader {
    state: State,
    hdr_buf: [u8; HEADER_SIZE],
    hdr_filled: usize,
    max_msg_size: u32,
}

impl MessageReader {
    /// Reader with the default payload ceiling.
    pub fn new() -> Self {
        Self::with_max_msg_size(DEFAULT_MAX_MSG_SIZE)
    }

    /// Reader with a custom payload ceiling. A header announcing a
    /// larger payload fails the push, which callers must treat as
    /// connection-fatal.
    pub fn with_max_msg_size(max_msg_size: u32) -> Self {
        Self {
            state: State::AwaitingHeader,
            hdr_buf: [0u8; HEADER_SIZE],
            hdr_filled: 0,
            max_msg_size,
        }
    }

    /// Consume a chunk of socket bytes, returning every message it
    /// completes.
    ///
    /// # Errors
    ///
    /// [`ProclinkError::Protocol`] when a header exceeds the configured
    /// maximum. The reader is then poisoned for that connection; the
    /// caller routes to the lost-connection path.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Vec<Message>> {
        let mut complete = Vec::new();

        while !data.is_empty() {
            match &mut self.state {
                State::AwaitingHeader => {
                    let want = HEADER_SIZE - self.hdr_filled;
                    let take = want.min(data.len());
                    self.hdr_buf[self.hdr_filled..self.hdr_filled + take]
                        .copy_from_slice(&data[..take]);
                    self.hdr_filled += take;
                    data = &data[take..];

                    if self.hdr_filled < HEADER_SIZE {
                        break; // short read; resume on next push
                    }

                    let header = Header::decode(&self.hdr_buf)
                        .expect("accumulated exactly HEADER_SIZE bytes");
                    self.hdr_filled = 0;
                    header.validate(self.max_msg_size)?;

                    if header.is_empty() {
                        complete.push(Message {
                            header,
                            payload: Vec::new(),
                        });
                    } else {
                        self.state = State::AwaitingBody {
                            header,
                            payload: Vec::with_capacity(header.nbytes as usize),
                        };
                    }
                }
                State::AwaitingBody { header, payload } => {
                    let want = header.nbytes as usize - payload.len();
                    let take = want.min(data.len());
                    payload.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if payload.len() == header.nbytes as usize {
                        let header = *header;
                        let payload = std::mem::take(payload);
                        self.state = State::AwaitingHeader;
                        complete.push(Message { header, payload });
                    }
                }
            }
        }

        Ok(complete)
    }

    /// True when no partial message is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingHeader) && self.hdr_filled == 0
    }
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message_bytes(pindex: u32, tag: u32, payload: &[u8]) -> Vec<u8> {
        let header = Header::new(pindex, tag, payload.len() as u32);
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_single_complete_message() {
        let mut reader = MessageReader::new();
        let bytes = make_message_bytes(3, 77, b"hello");

        let msgs = reader.push(&bytes).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].header.pindex, 3);
        assert_eq!(msgs[0].header.tag, 77);
        assert_eq!(msgs[0].payload, b"hello");
        assert!(reader.is_idle());
    }

    #[test]
    fn test_header_only_message() {
        let mut reader = MessageReader::new();
        let msgs = reader.push(&make_message_bytes(1, 9, b"")).unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].header.is_empty());
        assert!(msgs[0].payload.is_empty());
    }

    #[test]
    fn test_multiple_messages_one_push() {
        let mut reader = MessageReader::new();
        let mut bytes = make_message_bytes(1, 10, b"first");
        bytes.extend(make_message_bytes(2, 20, b""));
        bytes.extend(make_message_bytes(3, 30, b"third"));

        let msgs = reader.push(&bytes).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].payload, b"first");
        assert!(msgs[1].payload.is_empty());
        assert_eq!(msgs[2].payload, b"third");
    }

    #[test]
    fn test_split_header() {
        let mut reader = MessageReader::new();
        let bytes = make_message_bytes(1, 5, b"data");

        assert!(reader.push(&bytes[..HEADER_SIZE / 2]).unwrap().is_empty());
        assert!(!reader.is_idle());
        let msgs = reader.push(&bytes[HEADER_SIZE / 2..]).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, b"data");
    }

    #[test]
    fn test_split_body_mid_payload() {
        let mut reader = MessageReader::new();
        let payload = b"job metadata payload split across reads";
        let bytes = make_message_bytes(3, 77, payload);

        // header plus half the body, then the rest: the simulated
        // mid-body EAGAIN from the end-to-end property
        let cut = HEADER_SIZE + payload.len() / 2;
        assert!(reader.push(&bytes[..cut]).unwrap().is_empty());
        let msgs = reader.push(&bytes[cut..]).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, payload);
    }

    #[test]
    fn test_byte_at_a_time_identical_to_single_read() {
        let payload: Vec<u8> = (0u8..200).collect();
        let bytes = make_message_bytes(7, 42, &payload);

        let mut single = MessageReader::new();
        let whole = single.push(&bytes).unwrap();

        let mut dribble = MessageReader::new();
        let mut collected = Vec::new();
        for b in &bytes {
            collected.extend(dribble.push(std::slice::from_ref(b)).unwrap());
        }

        assert_eq!(whole.len(), 1);
        assert_eq!(collected.len(), 1);
        assert_eq!(whole[0].header, collected[0].header);
        assert_eq!(whole[0].payload, collected[0].payload);
    }

    #[test]
    fn test_oversized_message_is_fatal() {
        let mut reader = MessageReader::with_max_msg_size(64);
        let header = Header::new(1, 5, 1000).encode();
        let err = reader.push(&header).unwrap_err();
        assert!(matches!(err, ProclinkError::Protocol(_)));
    }

    #[test]
    fn test_partial_message_then_next_message() {
        let mut reader = MessageReader::new();
        let first = make_message_bytes(1, 10, b"alpha");
        let second = make_message_bytes(2, 20, b"beta");

        // complete first + fragment of second header
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second[..3]);
        let msgs = reader.push(&chunk).unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(!reader.is_idle());

        let msgs = reader.push(&second[3..]).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, b"beta");
        assert!(reader.is_idle());
    }
}
