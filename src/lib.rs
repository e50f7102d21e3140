//! Connection upgrade and stream multiplexing core.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! This crate is the hard middle of a libp2p-style peer-to-peer stack: it
//! turns a raw, reliable byte-pipe into a secure, multiplexed,
//! protocol-negotiating connection. It does not dial, listen, discover
//! peers, or speak any application protocol — those are collaborators
//! that sit above ([`upgrade::MuxerFactory`]/[`transport::SecurityUpgrade`]
//! implementations, application protocol handlers registered on a
//! [`multistream::Switch`]) or below (the transport that produces the raw
//! pipe in the first place) this crate.
//!
//! The pieces, leaves first:
//!
//! - [`frame`]: the muxer's 12-byte frame header codec.
//! - [`multistream`]: the length-delimited multistream-select line
//!   protocol — codec, negotiator, and protocol switch.
//! - [`stream`]: a single flow-controlled, ordered byte-channel inside a
//!   session.
//! - [`session`]: the muxed session that owns the stream table and the
//!   reader/writer/keep-alive actor tasks.
//! - [`upgrade`]: sequences a raw pipe through security and muxer
//!   negotiation into a [`upgrade::Conn`].
//! - [`scope`]: the resource-accounting hook the session calls through.

pub mod config;
mod dupe;
pub mod error;
pub mod frame;
pub mod multistream;
pub mod peer;
pub mod pushback;
pub mod scope;
pub mod session;
pub mod stream;
pub mod transport;
pub mod upgrade;

pub use config::{Config, NegotiationConfig};
pub use error::{Error, Result};
pub use peer::{Multiaddr, PeerId};
pub use session::{Role, Session};
pub use stream::MuxStream;
pub use upgrade::{upgrade_inbound, upgrade_outbound, Conn};
