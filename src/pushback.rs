//! A byte-pipe wrapper that lets a caller push unread bytes back onto the
//! front of the stream.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! The multistream negotiator reads in message-sized chunks, never more
//! than it needs, so in practice there is nothing left over by the time
//! negotiation completes on this crate's own codec. But collaborators
//! (a security module doing a buffered TLS/Noise handshake) may
//! over-read past their handshake's logical end, and those bytes need to
//! be reinjected ahead of the next layer rather than dropped. A thin
//! adapter around an inner pipe that intercepts one side of the I/O
//! traffic.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wraps `inner`, serving any `push_back`-ed bytes before resuming reads
/// from `inner` itself. Writes pass straight through.
pub struct PushbackPipe<P> {
    inner: P,
    pending: VecDeque<u8>,
}

impl<P> PushbackPipe<P> {
    /// Wrap a pipe with an empty pushback buffer.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    /// Reinject `bytes` so the next reads see them before anything new
    /// read from the underlying pipe. Later calls push further to the
    /// back, preserving the order bytes were originally observed in.
    pub fn push_back(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }

    /// Unwrap back to the inner pipe. Panics if there are still
    /// un-consumed pushed-back bytes, since discarding them silently
    /// would be a data-loss bug in the caller.
    pub fn into_inner(self) -> P {
        assert!(
            self.pending.is_empty(),
            "PushbackPipe::into_inner called with undrained pushed-back bytes"
        );
        self.inner
    }
}

impl<P: AsyncRead + Unpin> AsyncRead for PushbackPipe<P> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            let chunk: Vec<u8> = self.pending.drain(..n).collect();
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<P: AsyncWrite + Unpin> AsyncWrite for PushbackPipe<P> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
