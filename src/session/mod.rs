//! The public muxed-session handle: carries many flow-controlled streams
//! over one reliable byte-pipe (spec.md §4.E).
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! `Session` is a thin, cloneable handle over [`inner::SessionInner`],
//! which owns the actual reader/writer/keep-alive tasks. The split mirrors
//! the teacher's `Multiplexor`/`MultiplexorInner` pair in `mux/inner.rs`:
//! the outer type is what callers hold and `.dupe()` around, the inner
//! type is the `Arc`-shared actor state.

mod inner;

use std::sync::Arc;

use crate::config::Config;
use crate::dupe::Dupe;
use crate::error::Result;
use crate::frame::GoAwayCode;
use crate::scope::{ConnectionScope, NullScope};
use crate::stream::MuxStream;
use crate::transport::Pipe;

pub use inner::Role;
use inner::SessionInner;

/// One instance of the multiplexer over one secured pipe (spec.md §3
/// "Session").
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Spawn a session over `pipe`, with a no-op resource scope.
    pub fn new<P: Pipe>(pipe: P, role: Role, config: Config) -> Result<Self> {
        Self::with_scope(pipe, role, config, Arc::new(NullScope))
    }

    /// Spawn a session over `pipe`, wiring in a caller-supplied
    /// [`ConnectionScope`] for resource accounting (spec.md §4.G).
    pub fn with_scope<P: Pipe>(
        pipe: P,
        role: Role,
        config: Config,
        scope: Arc<dyn ConnectionScope>,
    ) -> Result<Self> {
        let inner = SessionInner::spawn(pipe, role, config, scope)?;
        Ok(Self { inner })
    }

    /// Open a new locally-initiated stream. Fails with [`Error::Limit`]
    /// if the session already holds `maxStreams` live streams, or
    /// [`Error::Closed`] if the session is closing or closed.
    ///
    /// [`Error::Limit`]: crate::error::Error::Limit
    /// [`Error::Closed`]: crate::error::Error::Closed
    pub fn open_stream(&self) -> Result<MuxStream> {
        self.inner.open_stream()
    }

    /// Wait for the next remote-opened stream. Concurrent callers are
    /// serialized so each receives a distinct stream (spec.md §4.E
    /// "Accept queue").
    pub async fn accept_stream(&self) -> Result<MuxStream> {
        self.inner.accept_stream().await
    }

    /// Send `GO_AWAY(0)`, reset every live stream, and tear the session
    /// down. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.inner.close(GoAwayCode::Normal).await
    }

    /// Whether the session has finished tearing down.
    pub fn is_closed(&self) -> bool {
        self.inner.state_is_closed()
    }

    /// Whether the peer has sent `GO_AWAY`; new local stream opens are
    /// refused once this is true, though existing streams still run to
    /// completion (spec.md §9, Open Question on `GO_AWAY` semantics).
    pub fn remote_went_away(&self) -> bool {
        self.inner.remote_went_away()
    }

    /// Number of currently live streams.
    pub fn stream_count(&self) -> usize {
        self.inner.open_stream_count()
    }
}

impl Dupe for Session {
    fn dupe(&self) -> Self {
        Self {
            inner: self.inner.dupe(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("streams", &self.stream_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn echo_through_a_fresh_stream() {
        let (client_io, server_io) = duplex(4096);
        let client = Session::new(client_io, Role::Initiator, Config::default()).unwrap();
        let server = Session::new(server_io, Role::Responder, Config::default()).unwrap();

        let mut a = client.open_stream().unwrap();
        let accept = tokio::spawn(async move { server.accept_stream().await.unwrap() });

        tokio::io::AsyncWriteExt::write_all(&mut a, &[0x01, 0x02, 0x03])
            .await
            .unwrap();
        let mut b = accept.await.unwrap();
        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut b, &mut buf).await.unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03]);

        tokio::io::AsyncWriteExt::write_all(&mut b, &buf).await.unwrap();
        let mut echoed = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut a, &mut echoed).await.unwrap();
        assert_eq!(echoed, buf);
    }

    #[tokio::test]
    async fn concurrent_streams_each_delivered_once() {
        let (client_io, server_io) = duplex(8192);
        let client = Session::new(client_io, Role::Initiator, Config::default()).unwrap();
        let server = Session::new(server_io, Role::Responder, Config::default()).unwrap();

        let mut opened = Vec::new();
        for i in 0u8..3 {
            let mut s = client.open_stream().unwrap();
            tokio::io::AsyncWriteExt::write_all(&mut s, &[i]).await.unwrap();
            opened.push(s);
        }
        assert_eq!(opened[0].id(), 1);
        assert_eq!(opened[1].id(), 3);
        assert_eq!(opened[2].id(), 5);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut accepted = server.accept_stream().await.unwrap();
            let mut buf = [0u8; 1];
            tokio::io::AsyncReadExt::read_exact(&mut accepted, &mut buf).await.unwrap();
            ids.push((accepted.id(), buf[0]));
        }
        ids.sort_by_key(|(id, _)| *id);
        assert_eq!(ids, vec![(1, 0), (3, 1), (5, 2)]);
    }

    #[tokio::test]
    async fn max_streams_enforced() {
        let (client_io, _server_io) = duplex(4096);
        let config = Config {
            max_streams: 1,
            ..Config::default()
        };
        let client = Session::new(client_io, Role::Initiator, config).unwrap();
        let _first = client.open_stream().unwrap();
        let err = client.open_stream().unwrap_err();
        assert!(matches!(err, crate::error::Error::Limit));
    }
}
