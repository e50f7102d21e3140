//! The per-stream state machine: flow-control windows, buffers, deadlines.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! `MuxStream` implements `AsyncRead`/`AsyncWrite` by hand: a fixed
//! send/recv window pair, a buffered queue of inbound payload chunks, and
//! per-direction deadlines, all guarded by one lock per stream so state
//! transitions never race a concurrent reader and writer.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::Config;
use crate::dupe::Dupe;
use crate::error::{Error, Result};
use crate::frame::{Flags, Frame};

/// A stream's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Freshly allocated, no frame sent or received yet.
    Init,
    /// We sent `SYN`, awaiting the peer's first frame.
    SynSent,
    /// We received `SYN`, haven't sent our first frame yet.
    SynReceived,
    /// Both directions are open.
    Open,
    /// We closed our write side (`FIN` sent); reads still possible.
    LocalClose,
    /// The peer closed its write side (`FIN` received); writes still possible.
    RemoteClose,
    /// Both sides closed cleanly.
    Closed,
    /// Either side sent/received `RST`.
    Reset,
}

impl State {
    fn can_read(self) -> bool {
        !matches!(self, State::RemoteClose | State::Closed | State::Reset)
    }

    fn can_write(self) -> bool {
        !matches!(self, State::LocalClose | State::Closed | State::Reset)
    }
}

/// Which control flag (if any) the next outbound frame on this stream
/// still needs to carry. The very first outbound frame on a
/// locally-initiated stream carries `SYN`; the first frame on a stream we
/// are `ACK`ing carries `ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingFlag {
    None,
    Syn,
    Ack,
}

pub(crate) struct Shared {
    state: State,
    send_window: u32,
    recv_window: u32,
    drained_since_update: u32,
    read_closed: bool,
    pending_flag: PendingFlag,
    buffer: VecDeque<Bytes>,
    reader: Option<Waker>,
    writer: Option<Waker>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl Shared {
    fn new(
        window: u32,
        initial_flag: PendingFlag,
        read_deadline: Option<Instant>,
        write_deadline: Option<Instant>,
    ) -> Self {
        Self {
            state: State::Init,
            send_window: window,
            recv_window: window,
            drained_since_update: 0,
            read_closed: false,
            pending_flag: initial_flag,
            buffer: VecDeque::new(),
            reader: None,
            writer: None,
            read_deadline,
            write_deadline,
        }
    }

    fn wake_reader(&mut self) {
        if let Some(w) = self.reader.take() {
            w.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(w) = self.writer.take() {
            w.wake();
        }
    }
}

/// State shared between a `MuxStream` handle and the owning session's
/// reader loop. The session holds its own `Arc<StreamShared>` in the
/// stream table so it can deliver frames without routing through the
/// stream's public API.
pub(crate) struct StreamShared {
    pub(crate) id: u32,
    pub(crate) max_frame_data_size: u32,
    pub(crate) window_update_threshold: u32,
    pub(crate) max_window: u32,
    shared: Mutex<Shared>,
    frame_tx: mpsc::UnboundedSender<Frame>,
}

impl StreamShared {
    /// Build a fresh stream's shared state, arming the read/write
    /// deadlines from `config`'s defaults rather than requiring every
    /// caller to set one explicitly.
    pub(crate) fn new(
        id: u32,
        config: &Config,
        initial_flag: PendingFlag,
        frame_tx: mpsc::UnboundedSender<Frame>,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            max_frame_data_size: config.max_frame_data_size,
            window_update_threshold: config.window_update_threshold(),
            max_window: config.max_stream_window_size,
            shared: Mutex::new(Shared::new(
                config.initial_stream_window_size,
                initial_flag,
                config.stream_read_timeout.map(|d| now + d),
                config.stream_write_timeout.map(|d| now + d),
            )),
            frame_tx,
        })
    }

    pub(crate) fn state(&self) -> State {
        self.shared.lock().state
    }

    /// Deliver an incoming DATA payload. If the read side has been closed
    /// locally, the bytes are discarded but the caller still replies with
    /// a WINDOW_UPDATE for the discarded size, so a peer that keeps
    /// writing after our FIN doesn't stall waiting on a window it will
    /// never see acknowledged.
    pub(crate) fn deliver_data(&self, payload: Bytes) {
        let mut shared = self.shared.lock();
        if shared.read_closed {
            let len = payload.len() as u32;
            drop(shared);
            self.grant_window(len);
            return;
        }
        if !payload.is_empty() {
            shared.buffer.push_back(payload);
        }
        shared.wake_reader();
    }

    /// Account an inbound DATA payload against the locally-tracked receive
    /// window before delivering it, as the session reader loop does for
    /// every DATA frame. Returns [`Error::Limit`] if the peer ignored the
    /// window it was granted; the caller should treat this as a protocol
    /// violation and tear down the whole session.
    pub(crate) fn receive_data(&self, payload: Bytes) -> Result<()> {
        {
            let mut shared = self.shared.lock();
            if !shared.read_closed {
                let len = payload.len() as u32;
                if len > shared.recv_window {
                    return Err(Error::Limit);
                }
                shared.recv_window -= len;
            }
        }
        self.deliver_data(payload);
        Ok(())
    }

    /// Mark the remote half closed (FIN received). The buffer remains
    /// drainable; `read()` only returns EOF once both buffer and flag are
    /// exhausted.
    pub(crate) fn deliver_fin(&self) {
        let mut shared = self.shared.lock();
        shared.state = match shared.state {
            State::Open => State::RemoteClose,
            State::LocalClose => State::Closed,
            other => other,
        };
        shared.wake_reader();
    }

    /// Mark the stream reset: clears the buffer and unblocks any pending
    /// read/write with `Error::Reset`.
    pub(crate) fn deliver_reset(&self) {
        let mut shared = self.shared.lock();
        shared.state = State::Reset;
        shared.buffer.clear();
        shared.wake_reader();
        shared.wake_writer();
    }

    /// Add `delta` to the send window (an inbound WINDOW_UPDATE) and wake
    /// any blocked writer.
    pub(crate) fn grant_send_window(&self, delta: u32) {
        let mut shared = self.shared.lock();
        shared.send_window = shared.send_window.saturating_add(delta).min(self.max_window);
        shared.wake_writer();
    }

    /// Called after the session has handed this stream to the user (SYN
    /// or SYN+first-data has been observed) to flip Init -> the
    /// appropriate open-ish state.
    pub(crate) fn mark_established(&self, local_initiated: bool) {
        let mut shared = self.shared.lock();
        if shared.state == State::Init {
            shared.state = if local_initiated {
                State::SynSent
            } else {
                State::SynReceived
            };
        }
    }

    pub(crate) fn promote_to_open(&self) {
        let mut shared = self.shared.lock();
        if matches!(shared.state, State::Init | State::SynSent | State::SynReceived) {
            shared.state = State::Open;
        }
    }

    fn grant_window(&self, amount: u32) {
        if amount == 0 {
            return;
        }
        let mut flags = Flags::empty();
        {
            let mut shared = self.shared.lock();
            shared.recv_window = shared.recv_window.saturating_add(amount).min(self.max_window);
            if shared.pending_flag == PendingFlag::Ack {
                flags |= Flags::ACK;
                shared.pending_flag = PendingFlag::None;
            }
        }
        let _ = self
            .frame_tx
            .send(Frame::window_update(self.id, amount, flags));
    }
}

/// Outcome of polling the stream's remaining deadline against `now`.
fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    if let Some(d) = deadline {
        if Instant::now() >= d {
            return Err(Error::Deadline);
        }
    }
    Ok(())
}

/// A logical, flow-controlled, ordered byte-channel inside a session.
pub struct MuxStream {
    shared: Arc<StreamShared>,
    /// Bytes already taken off `shared.buffer` that did not fully fit in
    /// the caller's read buffer on a previous call.
    leftover: Bytes,
}

impl MuxStream {
    pub(crate) fn new(shared: Arc<StreamShared>) -> Self {
        Self {
            shared,
            leftover: Bytes::new(),
        }
    }

    /// This stream's id, unique within its session.
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Arm (or clear, with `None`) both read and write deadlines.
    pub fn set_deadline(&mut self, deadline: Option<std::time::Duration>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// Arm (or clear) the read-side deadline.
    pub fn set_read_deadline(&mut self, deadline: Option<std::time::Duration>) {
        let mut shared = self.shared.shared.lock();
        shared.read_deadline = deadline.map(|d| Instant::now() + d);
        shared.wake_reader();
    }

    /// Arm (or clear) the write-side deadline.
    pub fn set_write_deadline(&mut self, deadline: Option<std::time::Duration>) {
        let mut shared = self.shared.shared.lock();
        shared.write_deadline = deadline.map(|d| Instant::now() + d);
        shared.wake_writer();
    }

    /// Send a zero-length DATA frame with FIN. Further writes fail after
    /// this call.
    ///
    /// This never actually awaits (the frame handoff to the session's
    /// writer task is a non-blocking channel send); it is `async` to match
    /// the rest of the stream's public API.
    pub async fn close_write(&mut self) -> Result<()> {
        self.do_close_write()
    }

    fn do_close_write(&self) -> Result<()> {
        let (extra, already_done) = {
            let mut shared = self.shared.shared.lock();
            if matches!(shared.state, State::LocalClose | State::Closed | State::Reset) {
                (Flags::empty(), true)
            } else {
                let extra = match shared.pending_flag {
                    PendingFlag::Syn => Flags::SYN,
                    PendingFlag::Ack => Flags::ACK,
                    PendingFlag::None => Flags::empty(),
                };
                shared.pending_flag = PendingFlag::None;
                shared.state = match shared.state {
                    State::RemoteClose => State::Closed,
                    _ => State::LocalClose,
                };
                (extra, false)
            }
        };
        if already_done {
            return Ok(());
        }
        debug!(stream_id = self.shared.id, "closing write side");
        self.shared
            .frame_tx
            .send(Frame::fin(self.shared.id, extra))
            .map_err(|_| Error::Closed)?;
        Ok(())
    }

    /// Stop accepting inbound DATA; further arrivals are discarded (but
    /// still acknowledged with a WINDOW_UPDATE to avoid head-of-line
    /// blocking the peer).
    pub fn close_read(&mut self) {
        let mut shared = self.shared.shared.lock();
        shared.read_closed = true;
        shared.buffer.clear();
        shared.wake_reader();
    }

    /// Perform both closes. Session removes the stream from its table
    /// once both sides are closed.
    pub async fn close(&mut self) -> Result<()> {
        self.close_read();
        self.close_write().await
    }

    /// Send an RST and transition directly to `Reset`; unblocks any
    /// pending read/write with `Error::Reset`.
    pub fn reset(&mut self) {
        {
            let mut shared = self.shared.shared.lock();
            if shared.state == State::Reset {
                return;
            }
            shared.state = State::Reset;
            shared.buffer.clear();
            shared.wake_reader();
            shared.wake_writer();
        }
        let _ = self.shared.frame_tx.send(Frame::reset(self.shared.id));
    }

    fn poll_read_impl(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        if !self.leftover.is_empty() {
            let n = self.leftover.len().min(buf.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover.advance(n);
            self.note_drained(n as u32);
            return Poll::Ready(Ok(n));
        }

        let mut shared = self.shared.shared.lock();
        if shared.state == State::Reset {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")));
        }
        if let Err(e) = check_deadline(shared.read_deadline) {
            return Poll::Ready(Err(to_io_error(e)));
        }
        if let Some(mut chunk) = shared.buffer.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.advance(n);
            drop(shared);
            if !chunk.is_empty() {
                self.leftover = chunk;
            }
            self.note_drained(n as u32);
            return Poll::Ready(Ok(n));
        }
        if !shared.state.can_read() {
            // Buffer empty and remote half-closed (or we're fully closed):
            // clean EOF.
            return Poll::Ready(Ok(0));
        }
        shared.reader = Some(cx.waker().clone());
        Poll::Pending
    }

    fn note_drained(&self, n: u32) {
        if n == 0 {
            return;
        }
        let grant = {
            let mut shared = self.shared.shared.lock();
            shared.drained_since_update = shared.drained_since_update.saturating_add(n);
            if shared.drained_since_update >= self.shared.window_update_threshold {
                let amount = shared.drained_since_update;
                shared.drained_since_update = 0;
                Some(amount)
            } else {
                None
            }
        };
        if let Some(amount) = grant {
            trace!(stream_id = self.shared.id, amount, "sending window update");
            self.shared.grant_window(amount);
        }
    }

    fn poll_write_impl(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let (to_send, flags) = {
            let mut shared = self.shared.shared.lock();
            if !shared.state.can_write() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "stream write side closed",
                )));
            }
            if let Err(e) = check_deadline(shared.write_deadline) {
                return Poll::Ready(Err(to_io_error(e)));
            }
            if shared.send_window == 0 {
                shared.writer = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = (shared.send_window as usize)
                .min(buf.len())
                .min(self.shared.max_frame_data_size as usize);
            shared.send_window -= n as u32;
            let mut flags = Flags::empty();
            match shared.pending_flag {
                PendingFlag::Syn => flags |= Flags::SYN,
                PendingFlag::Ack => flags |= Flags::ACK,
                PendingFlag::None => {}
            }
            shared.pending_flag = PendingFlag::None;
            (n, flags)
        };
        let frame = Frame::data(self.shared.id, Bytes::copy_from_slice(&buf[..to_send]), flags);
        self.shared
            .frame_tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session closed"))?;
        Poll::Ready(Ok(to_send))
    }
}

fn to_io_error(e: Error) -> io::Error {
    match e {
        Error::Deadline => io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"),
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut tmp = vec![0u8; buf.remaining()];
        match self.as_mut().get_mut().poll_read_impl(cx, &mut tmp) {
            Poll::Ready(Ok(n)) => {
                buf.put_slice(&tmp[..n]);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.as_mut().get_mut().poll_write_impl(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().do_close_write() {
            Ok(()) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(to_io_error(e))),
        }
    }
}

impl Dupe for MuxStream {
    fn dupe(&self) -> Self {
        Self {
            shared: self.shared.dupe(),
            leftover: Bytes::new(),
        }
    }
}

impl std::fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxStream")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}
