//! Send-side engine: pending sends, vectored writes, writer task.
//!
//! Each peer has one writer task fed by an mpsc channel. The channel is
//! the outbound FIFO; the message the task is currently driving is the
//! single "on-deck" send. A send is written with a vectored
//! header+payload write; short writes advance a byte offset and resume,
//! so a send split across any number of attempts is byte-identical to
//! one uninterrupted write. Write errors terminate the task; the
//! owning engine routes that through the lost-connection path.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::wire::{Header, HEADER_SIZE};
use crate::error::{ProclinkError, Result};

/// A message queued for transmission, tracking how many of its bytes
/// have already been written.
#[derive(Debug)]
pub struct PendingSend {
    /// Pre-encoded header (12 bytes, network order).
    header: [u8; HEADER_SIZE],
    /// Payload bytes; empty for header-only messages.
    payload: Bytes,
    /// Bytes of header+payload already written.
    written: usize,
}

impl PendingSend {
    /// Build a send descriptor from a header and payload.
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
            written: 0,
        }
    }

    /// Header-only send.
    pub fn empty(header: &Header) -> Self {
        Self::new(header, Bytes::new())
    }

    /// Total size of this message (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// True once every byte has been written.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.written == self.size()
    }

    /// Record `n` more bytes written.
    fn advance(&mut self, n: usize) {
        self.written += n;
        debug_assert!(self.written <= self.size());
    }

    /// I/O slices covering the remaining unwritten bytes: part of the
    /// header, part of the payload, or both.
    fn remaining_slices(&self) -> Vec<IoSlice<'_>> {
        let mut slices = Vec::with_capacity(2);
        if self.written < HEADER_SIZE {
            slices.push(IoSlice::new(&self.header[self.written..]));
            if !self.payload.is_empty() {
                slices.push(IoSlice::new(&self.payload));
            }
        } else {
            let offset = self.written - HEADER_SIZE;
            if offset < self.payload.len() {
                slices.push(IoSlice::new(&self.payload[offset..]));
            }
        }
        slices
    }
}

/// Drive one pending send to completion, resuming across short writes.
pub async fn write_pending<W>(writer: &mut W, send: &mut PendingSend) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !send.is_complete() {
        let slices = send.remaining_slices();
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(ProclinkError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        send.advance(n);
    }
    writer.flush().await?;
    Ok(())
}

/// Cheaply cloneable handle queueing sends onto a peer's writer task.
///
/// Enqueueing never blocks: the FIFO is unbounded, and a lost
/// connection (which drops the queue wholesale) is the only thing that
/// stops it growing.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<PendingSend>,
}

impl WriterHandle {
    /// Queue a send. Fails with [`ProclinkError::Unreachable`] once the
    /// writer task has terminated.
    pub fn send(&self, send: PendingSend) -> Result<()> {
        self.tx.send(send).map_err(|_| ProclinkError::Unreachable)
    }
}

/// Spawn the writer task for one peer.
///
/// Returns the send handle and the task's join handle; the task ends
/// when every handle is dropped (clean) or a write fails (the engine's
/// cue to run lost-connection handling).
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<PendingSend>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One on-deck message at a time; the channel holds the FIFO.
    while let Some(mut send) = rx.recv().await {
        if let Err(e) = write_pending(&mut writer, &mut send).await {
            tracing::debug!("send failed, dropping queued messages: {}", e);
            return Err(e);
        }
    }
    Ok(())
}
