//! The muxed session's actor tasks: reader, writer, keep-alive.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Three independent tasks share one `Arc<SessionInner>`, the same split
//! the teacher uses (`mux/inner.rs`'s `process_ws_next`/
//! `process_frame_recv_task`/keep-alive timer driven by a single
//! `poll_fn` combinator): a reader decodes frames off the wire and
//! mutates the stream table, a writer drains an mpsc queue of outbound
//! frames, and a keep-alive loop pings on an interval and kills the
//! session on a missed pong. A lightweight supervisor task waits for any
//! of the three to end and aborts the others, cross-checked against
//! `rust-yamux`'s `Connection::garbage_collect`/`on_drop` teardown shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::dupe::Dupe;
use crate::error::{Error, Result};
use crate::frame::{Flags, Frame, GoAwayCode, OpCode, HEADER_LEN};
use crate::scope::ConnectionScope;
use crate::stream::{MuxStream, PendingFlag, State as StreamState, StreamShared};

/// Which side of the underlying connection this session runs on. Governs
/// stream-id parity: the initiator hands out odd ids, the responder even
/// ones, so two independently-allocating peers can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Open,
    GoingAway,
    Closed,
}

pub(crate) struct SessionInner {
    streams: RwLock<HashMap<u32, Arc<StreamShared>>>,
    next_id: AtomicU32,
    config: Config,
    frame_tx: mpsc::UnboundedSender<Frame>,
    accept_tx: mpsc::Sender<MuxStream>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<MuxStream>>,
    state: RwLock<SessionState>,
    pending_pings: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    ping_seq: AtomicU64,
    #[allow(dead_code)] // reserved for collaborators that inspect usage; not read internally yet
    scope: Arc<dyn ConnectionScope>,
    closed: Notify,
    remote_go_away: std::sync::atomic::AtomicBool,
    task_handles: Mutex<Option<[AbortHandle; 3]>>,
}

impl SessionInner {
    pub(crate) fn spawn<S>(
        io: S,
        role: Role,
        config: Config,
        scope: Arc<dyn ConnectionScope>,
    ) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(config.max_streams.max(1));
        let start_id = match role {
            Role::Initiator => 1,
            Role::Responder => 2,
        };

        let inner = Arc::new(SessionInner {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(start_id),
            config,
            frame_tx,
            accept_tx,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            state: RwLock::new(SessionState::Open),
            pending_pings: Mutex::new(HashMap::new()),
            ping_seq: AtomicU64::new(0),
            scope,
            closed: Notify::new(),
            remote_go_away: std::sync::atomic::AtomicBool::new(false),
            task_handles: Mutex::new(None),
        });

        let (read_half, write_half) = tokio::io::split(io);
        let max_frame_data_size = config.max_frame_data_size;

        let reader_inner = inner.dupe();
        let reader_handle = tokio::spawn(async move { reader_task(read_half, reader_inner).await });
        let writer_handle =
            tokio::spawn(async move { writer_task(write_half, frame_rx, max_frame_data_size).await });
        let keepalive_inner = inner.dupe();
        let keepalive_handle = tokio::spawn(async move { keepalive_task(keepalive_inner).await });

        *inner.task_handles.lock() = Some([
            reader_handle.abort_handle(),
            writer_handle.abort_handle(),
            keepalive_handle.abort_handle(),
        ]);

        let supervisor_inner = inner.dupe();
        tokio::spawn(async move {
            tokio::select! {
                result = reader_handle => log_task_exit("reader", result),
                result = writer_handle => log_task_exit("writer", result),
                result = keepalive_handle => log_task_exit("keepalive", result),
            }
            supervisor_inner.wind_down();
        });

        Ok(inner)
    }

    pub(crate) fn open_stream(self: &Arc<Self>) -> Result<MuxStream> {
        if *self.state.read() != SessionState::Open {
            return Err(Error::Closed);
        }
        if self.remote_go_away.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let mut streams = self.streams.write();
        if streams.len() >= self.config.max_streams {
            return Err(Error::Limit);
        }
        let id = self.allocate_stream_id()?;
        let shared = StreamShared::new(id, &self.config, PendingFlag::Syn, self.frame_tx.dupe());
        shared.mark_established(true);
        streams.insert(id, shared.dupe());
        drop(streams);
        trace!(stream_id = id, "opened local stream");
        Ok(MuxStream::new(shared))
    }

    pub(crate) async fn accept_stream(self: &Arc<Self>) -> Result<MuxStream> {
        if *self.state.read() == SessionState::Closed {
            return Err(Error::Closed);
        }
        let mut rx = self.accept_rx.lock().await;
        tokio::select! {
            stream = rx.recv() => stream.ok_or(Error::Closed),
            () = self.closed.notified() => Err(Error::Closed),
        }
    }

    pub(crate) async fn close(self: &Arc<Self>, code: GoAwayCode) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::GoingAway;
        }
        self.send_go_away(code);
        self.wind_down();
        Ok(())
    }

    pub(crate) fn state_is_closed(&self) -> bool {
        *self.state.read() == SessionState::Closed
    }

    pub(crate) fn remote_went_away(&self) -> bool {
        self.remote_go_away.load(Ordering::SeqCst)
    }

    pub(crate) fn open_stream_count(&self) -> usize {
        self.streams.read().len()
    }

    fn allocate_stream_id(&self) -> Result<u32> {
        let id = self.next_id.fetch_add(2, Ordering::SeqCst);
        if id == 0 || id > u32::MAX - 2 {
            return Err(Error::IdExhausted);
        }
        Ok(id)
    }

    fn send_go_away(&self, code: GoAwayCode) {
        let _ = self.frame_tx.send(Frame::go_away(code));
    }

    /// Tear the session down: mark closed, abort the actor tasks, reset
    /// every live stream, and wake anyone blocked in `accept_stream`.
    /// Idempotent — safe to call from the supervisor after a task exit
    /// and again from an explicit `close()`.
    fn wind_down(&self) {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        debug!("session winding down");
        if let Some(handles) = self.task_handles.lock().take() {
            for handle in handles {
                handle.abort();
            }
        }
        for (_, stream) in self.streams.write().drain() {
            stream.deliver_reset();
        }
        self.pending_pings.lock().clear();
        self.closed.notify_waiters();
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) -> Result<()> {
        match frame.opcode {
            OpCode::Ping => self.handle_ping(&frame),
            OpCode::GoAway => {
                debug!("received GO_AWAY");
                self.remote_go_away.store(true, Ordering::SeqCst);
                Ok(())
            }
            OpCode::WindowUpdate => self.handle_window_update(&frame),
            OpCode::Data => self.handle_data(frame),
        }
    }

    fn handle_ping(&self, frame: &Frame) -> Result<()> {
        let id = frame.ping_id()?;
        if frame.flags.contains(Flags::ACK) {
            if let Some(tx) = self.pending_pings.lock().remove(&id) {
                let _ = tx.send(());
            }
        } else {
            let _ = self.frame_tx.send(Frame::ping(id, true));
        }
        Ok(())
    }

    fn handle_window_update(&self, frame: &Frame) -> Result<()> {
        let delta = frame.window_delta()?;
        if let Some(stream) = self.streams.read().get(&frame.stream_id) {
            stream.grant_send_window(delta);
        }
        Ok(())
    }

    fn handle_data(self: &Arc<Self>, frame: Frame) -> Result<()> {
        let existing = self.streams.read().get(&frame.stream_id).map(|s| s.dupe());
        let stream = match existing {
            Some(s) => s,
            None => {
                if !frame.flags.contains(Flags::SYN) {
                    trace!(stream_id = frame.stream_id, "frame for unknown stream, ignoring");
                    return Ok(());
                }
                match self.accept_new_stream(frame.stream_id) {
                    Some(s) => s,
                    None => return Ok(()),
                }
            }
        };

        if frame.flags.contains(Flags::ACK) {
            stream.promote_to_open();
        }
        if frame.flags.contains(Flags::RST) {
            stream.deliver_reset();
            self.streams.write().remove(&frame.stream_id);
            return Ok(());
        }
        if !frame.payload.is_empty() {
            if let Err(e) = stream.receive_data(frame.payload.clone()) {
                warn!(stream_id = frame.stream_id, "receive window violated, closing session");
                self.send_go_away(GoAwayCode::ProtocolError);
                return Err(e);
            }
        }
        if frame.flags.contains(Flags::FIN) {
            stream.deliver_fin();
            if stream.state() == StreamState::Closed {
                self.streams.write().remove(&frame.stream_id);
            }
        }
        Ok(())
    }

    fn accept_new_stream(self: &Arc<Self>, stream_id: u32) -> Option<Arc<StreamShared>> {
        if *self.state.read() != SessionState::Open {
            let _ = self.frame_tx.send(Frame::reset(stream_id));
            return None;
        }
        let mut streams = self.streams.write();
        if streams.len() >= self.config.max_streams {
            drop(streams);
            warn!(stream_id, "refusing new stream, session at max_streams");
            let _ = self.frame_tx.send(Frame::reset(stream_id));
            return None;
        }
        let shared = StreamShared::new(stream_id, &self.config, PendingFlag::Ack, self.frame_tx.dupe());
        shared.mark_established(false);
        streams.insert(stream_id, shared.dupe());
        drop(streams);

        match self.accept_tx.try_send(MuxStream::new(shared.dupe())) {
            Ok(()) => {
                trace!(stream_id, "accepted new remote stream");
                Some(shared)
            }
            Err(_) => {
                self.streams.write().remove(&stream_id);
                let _ = self.frame_tx.send(Frame::reset(stream_id));
                None
            }
        }
    }
}

fn log_task_exit(which: &'static str, result: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => debug!(task = which, "actor task finished"),
        Ok(Err(e)) => debug!(task = which, error = %e, "actor task ended with error"),
        Err(e) if e.is_cancelled() => trace!(task = which, "actor task aborted"),
        Err(e) => warn!(task = which, error = %e, "actor task panicked"),
    }
}

async fn reader_task<R: AsyncRead + Unpin>(mut reader: R, inner: Arc<SessionInner>) -> Result<()> {
    loop {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let (opcode, flags, stream_id, length) = Frame::decode_header(&header)?;
        if length > inner.config.max_frame_data_size {
            inner.send_go_away(GoAwayCode::ProtocolError);
            return Err(Error::protocol("frame exceeds max_frame_data_size"));
        }
        let mut payload = vec![0u8; length as usize];
        if length > 0 {
            reader.read_exact(&mut payload).await?;
        }
        let frame = Frame {
            opcode,
            flags,
            stream_id,
            payload: Bytes::from(payload),
        };
        inner.dispatch(frame)?;
    }
}

async fn writer_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut frame_rx: mpsc::UnboundedReceiver<Frame>,
    max_frame_data_size: u32,
) -> Result<()> {
    while let Some(frame) = frame_rx.recv().await {
        let encoded = frame.encode(max_frame_data_size)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn keepalive_task(inner: Arc<SessionInner>) -> Result<()> {
    let interval = match inner.config.keepalive_interval {
        Some(d) if !d.is_zero() => d,
        _ => {
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let id = inner.ping_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        inner.pending_pings.lock().insert(id, tx);
        inner
            .frame_tx
            .send(Frame::ping(id, false))
            .map_err(|_| Error::Closed)?;
        match tokio::time::timeout(inner.config.connection_read_timeout, rx).await {
            Ok(Ok(())) => {
                trace!(ping_id = id, "keep-alive pong received");
            }
            _ => {
                inner.pending_pings.lock().remove(&id);
                warn!(ping_id = id, "keep-alive pong missed, closing session");
                return Err(Error::KeepAliveTimeout);
            }
        }
    }
}
