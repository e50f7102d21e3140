//! Opaque identifiers the core stores but never derives.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Peer identity and multiaddress are supplied by collaborators above and
//! below this crate (the security module derives a `PeerId` from a public
//! key; the transport collaborator produces and parses `Multiaddr`s). This
//! crate treats both as opaque, hashable values it threads through the
//! upgrader and connection object.

use bytes::Bytes;
use std::fmt;

pub use multiaddr::Multiaddr;

/// A peer's identity, as handed to us by a security module after a
/// handshake. We never construct these ourselves (see
/// [`crate::transport::SecurityUpgrade`]); we only store, compare, and log
/// them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId(Bytes);

impl PeerId {
    /// Wrap an opaque identity buffer as produced by a security module.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the raw identity bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex_preview(&self.0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_preview(&self.0))
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let take = bytes.len().min(8);
    let mut s = String::with_capacity(take * 2 + 3);
    for b in &bytes[..take] {
        s.push_str(&format!("{b:02x}"));
    }
    if bytes.len() > take {
        s.push('\u{2026}');
    }
    s
}

/// Extract the transport-family tag from a [`Multiaddr`] for reporting
/// (e.g. `"tcp"`, `"udx"`). The rest of the address stays opaque to this
/// crate; only the transport-family component is ever inspected. Returns
/// `None` for an address with no recognized transport component.
pub fn transport_tag(addr: &Multiaddr) -> Option<&'static str> {
    use multiaddr::Protocol;
    addr.iter().find_map(|proto| match proto {
        Protocol::Tcp(_) => Some("tcp"),
        Protocol::Udp(_) => Some("udp"),
        Protocol::Quic | Protocol::QuicV1 => Some("quic"),
        Protocol::Ws(_) | Protocol::Wss(_) => Some("ws"),
        _ => None,
    })
}


    #[test]
    fn transport_tag_extracts_tcp() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(transport_tag(&addr), Some("tcp"));
    }

    #[test]
    fn transport_tag_none_for_unrecognized() {
        let addr: Multiaddr = "/ip4/127.0.0.1".parse().unwrap();
        assert_eq!(transport_tag(&addr), None);
    }
}
