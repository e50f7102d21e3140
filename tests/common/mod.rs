//! Shared test scaffolding: tracing install and a couple of pipe wrappers
//! used to observe or disrupt wire traffic from outside the crate.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use junction_mux::frame::HEADER_LEN;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Installs a `tracing_subscriber::fmt` layer once, before any test in the
/// binary runs, the same `ctor`-driven approach the teacher uses to wire up
/// logging ahead of `main`.
#[ctor::ctor]
fn install_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "junction_mux=debug".to_string()),
        )
        .try_init();
}

/// Wraps a byte-pipe and silently discards any outgoing muxer frame whose
/// opcode is `PING` (opcode byte `2`), leaving every other frame untouched.
/// Reads are passed straight through. Used to simulate a peer that stops
/// answering keep-alives without otherwise breaking the connection.
///
/// `unparsed` holds bytes handed to `poll_write` that don't yet add up to a
/// whole frame; `ready` holds filtered bytes waiting on a still-pending
/// `inner` write. Keeping these separate means a `Poll::Pending` partway
/// through forwarding a frame never loses bytes already accepted from the
/// caller.
pub struct DropPing<T> {
    inner: T,
    unparsed: Vec<u8>,
    ready: Vec<u8>,
}

impl<T> DropPing<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            unparsed: Vec::new(),
            ready: Vec::new(),
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for DropPing<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for DropPing<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let accepted = buf.len();
        self.unparsed.extend_from_slice(buf);
        while self.unparsed.len() >= HEADER_LEN {
            let opcode = self.unparsed[1];
            let len = u32::from_be_bytes([
                self.unparsed[8],
                self.unparsed[9],
                self.unparsed[10],
                self.unparsed[11],
            ]) as usize;
            let total = HEADER_LEN + len;
            if self.unparsed.len() < total {
                break;
            }
            let frame: Vec<u8> = self.unparsed.drain(..total).collect();
            if opcode != 2 {
                self.ready.extend_from_slice(&frame);
            }
        }

        while !self.ready.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, &self.ready) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(n)) => {
                    self.ready.drain(..n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {
                    // Bytes stay queued in `ready`; the caller's bytes were
                    // already absorbed into our buffers, so report success.
                    return Poll::Ready(Ok(accepted));
                }
            }
        }
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while !self.ready.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, &self.ready) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(n)) => {
                    self.ready.drain(..n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// One observed outgoing `DATA` frame: its stream id and payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedDataFrame {
    pub stream_id: u32,
    pub len: usize,
}

/// Wraps a byte-pipe and records the stream id and payload length of every
/// outgoing `DATA` frame (opcode byte `0`) as it passes through, without
/// altering the bytes forwarded to `inner`. Used to observe the exact
/// frame sizes a flow-controlled writer emits.
pub struct RecordDataFrames<T> {
    inner: T,
    unparsed: Vec<u8>,
    pub frames: Arc<Mutex<Vec<ObservedDataFrame>>>,
}

impl<T> RecordDataFrames<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            unparsed: Vec::new(),
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn frames_handle(&self) -> Arc<Mutex<Vec<ObservedDataFrame>>> {
        self.frames.clone()
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for RecordDataFrames<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for RecordDataFrames<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let n = match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => n,
            other => return other,
        };
        // Only bytes `inner` actually accepted are ours to parse; a short
        // write means the rest will come back around in a later call.
        this.unparsed.extend_from_slice(&buf[..n]);
        while this.unparsed.len() >= HEADER_LEN {
            let opcode = this.unparsed[1];
            let stream_id = u32::from_be_bytes([
                this.unparsed[4],
                this.unparsed[5],
                this.unparsed[6],
                this.unparsed[7],
            ]);
            let len = u32::from_be_bytes([
                this.unparsed[8],
                this.unparsed[9],
                this.unparsed[10],
                this.unparsed[11],
            ]) as usize;
            let total = HEADER_LEN + len;
            if this.unparsed.len() < total {
                break;
            }
            if opcode == 0 && len > 0 {
                this.frames
                    .lock()
                    .unwrap()
                    .push(ObservedDataFrame { stream_id, len });
            }
            this.unparsed.drain(..total);
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
