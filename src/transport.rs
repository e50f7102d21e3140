//! Collaborator trait surface the upgrader consumes.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Transport dialing/listening and concrete security protocols
//! (Noise/TLS handshakes) live outside this crate; this module only
//! defines the seams [`upgrade`](crate::upgrade) plugs into: a clean
//! split between "raw byte pipe" and "the thing that knows how to frame
//! it".

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::peer::PeerId;

/// A reliable, ordered byte-pipe: a raw transport connection before any
/// upgrade has been applied, or a secured connection after the security
/// upgrade and before the muxer upgrade.
pub trait Pipe: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Pipe for T {}

/// A type-erased pipe, boxed so the upgrader can hold an ordered list of
/// security/muxer factories without each one fixing the concrete
/// transport type. `Box<dyn Pipe>` is itself `AsyncRead + AsyncWrite +
/// Unpin + Send + 'static` via tokio's blanket impls for `Box<T:
/// ?Sized>`, so it satisfies `Pipe` in turn.
pub type BoxedPipe = Box<dyn Pipe>;

/// The security collaborator: wraps a raw pipe in an authenticated,
/// encrypted channel and reports the remote peer's identity. A
/// concrete implementation (Noise, TLS, plaintext-for-testing) is out of
/// scope here; this is only the seam `upgrade::upgrade_outbound`/
/// `upgrade_inbound` call through. Object-safe (fixed on `BoxedPipe`) so
/// the upgrader can hold an ordered, heterogeneous list of these keyed by
/// protocol id, iterated in the order the negotiator returns.
#[async_trait]
pub trait SecurityUpgrade: Send + Sync {
    /// Perform the outbound (dialer) half of the security handshake,
    /// optionally verifying the connection belongs to `expected_peer`.
    async fn secure_outbound(
        &self,
        pipe: BoxedPipe,
        expected_peer: Option<&PeerId>,
    ) -> Result<(BoxedPipe, PeerId)>;

    /// Perform the inbound (listener) half of the security handshake.
    async fn secure_inbound(&self, pipe: BoxedPipe) -> Result<(BoxedPipe, PeerId)>;
}

/// A trivial security upgrade that performs no handshake at all and
/// reports a fixed peer identity. Exists purely so the upgrader and its
/// tests have a concrete, dependency-free `SecurityUpgrade` to exercise;
/// production callers supply their own (Noise, TLS, ...).
pub struct PlaintextSecurity {
    pub local_peer: PeerId,
}

#[async_trait]
impl SecurityUpgrade for PlaintextSecurity {
    async fn secure_outbound(
        &self,
        pipe: BoxedPipe,
        _expected_peer: Option<&PeerId>,
    ) -> Result<(BoxedPipe, PeerId)> {
        Ok((pipe, self.local_peer.clone()))
    }

    async fn secure_inbound(&self, pipe: BoxedPipe) -> Result<(BoxedPipe, PeerId)> {
        Ok((pipe, self.local_peer.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn plaintext_security_reports_fixed_peer() {
        let local_peer = PeerId::from_bytes(vec![1, 2, 3]);
        let security = PlaintextSecurity {
            local_peer: local_peer.clone(),
        };
        let (a, _b) = duplex(64);
        let (_secured, reported) = security
            .secure_outbound(Box::new(a), None)
            .await
            .unwrap();
        assert_eq!(reported, local_peer);
    }
}
