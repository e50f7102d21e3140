//! Sequences a raw transport byte-pipe into a secure, multiplexed
//! connection.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! `upgrade_outbound`/`upgrade_inbound` run multistream-select twice (once
//! to agree on a security protocol, once to agree on a muxer), hand the
//! negotiated-over pipe to the chosen collaborator, and return a [`Conn`].
//! The upgrader itself is stateless: everything it needs travels in
//! [`UpgradeConfig`], an ordered list of named factories rather than
//! ad-hoc callback registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::{Config, NegotiationConfig};
use crate::dupe::Dupe;
use crate::error::{Error, Result};
use crate::multistream::{listener_negotiate, select_one_of};
use crate::peer::{transport_tag, Multiaddr, PeerId};
use crate::pushback::PushbackPipe;
use crate::scope::{ConnectionScope, NullScope};
use crate::session::{Role, Session};
use crate::stream::MuxStream;
use crate::transport::{BoxedPipe, Pipe, SecurityUpgrade};

/// One named security collaborator the upgrader may negotiate.
pub struct SecurityEntry {
    pub protocol_id: &'static str,
    pub upgrade: Arc<dyn SecurityUpgrade>,
}

/// A muxer collaborator: given a (secured) pipe and role, builds the
/// session object that will carry the connection's streams. This crate's
/// own yamux-style session is the one concrete implementation
/// ([`YamuxFactory`]); the trait exists so a caller assembling
/// [`UpgradeConfig`] could in principle list alternatives and let
/// negotiation pick between them.
pub trait MuxerFactory: Send + Sync {
    /// Instantiate the muxer on `pipe`, already secured and past protocol
    /// negotiation.
    fn create(
        &self,
        pipe: BoxedPipe,
        role: Role,
        config: Config,
        scope: Arc<dyn ConnectionScope>,
    ) -> Result<Session>;
}

/// One named muxer collaborator the upgrader may negotiate.
pub struct MuxerEntry {
    pub protocol_id: &'static str,
    pub factory: Arc<dyn MuxerFactory>,
}

/// The yamux-style session muxer this crate implements.
pub struct YamuxFactory;

impl MuxerFactory for YamuxFactory {
    fn create(
        &self,
        pipe: BoxedPipe,
        role: Role,
        config: Config,
        scope: Arc<dyn ConnectionScope>,
    ) -> Result<Session> {
        Session::with_scope(pipe, role, config, scope)
    }
}

/// Everything the upgrader needs, gathered so `upgrade_outbound`/
/// `upgrade_inbound` hold no state of their own.
pub struct UpgradeConfig {
    /// Session-level tunables handed to the chosen [`MuxerFactory`].
    pub session: Config,
    /// Multistream-select timeouts/retries used for both negotiation
    /// rounds.
    pub negotiation: NegotiationConfig,
    /// Security protocols offered/accepted, in preference order.
    pub security_protocols: Vec<SecurityEntry>,
    /// Muxer protocols offered/accepted, in preference order.
    pub muxer_protocols: Vec<MuxerEntry>,
}

impl UpgradeConfig {
    fn security_ids(&self) -> Vec<String> {
        self.security_protocols
            .iter()
            .map(|e| e.protocol_id.to_string())
            .collect()
    }

    fn muxer_ids(&self) -> Vec<String> {
        self.muxer_protocols
            .iter()
            .map(|e| e.protocol_id.to_string())
            .collect()
    }

    fn find_security(&self, id: &str) -> Option<Arc<dyn SecurityUpgrade>> {
        self.security_protocols
            .iter()
            .find(|e| e.protocol_id == id)
            .map(|e| e.upgrade.dupe())
    }

    fn find_muxer(&self, id: &str) -> Option<Arc<dyn MuxerFactory>> {
        self.muxer_protocols
            .iter()
            .find(|e| e.protocol_id == id)
            .map(|e| e.factory.dupe())
    }
}

/// The negotiated identity of a connection: which security and muxer
/// protocols were agreed on, the transport tag, and whether muxer
/// negotiation ran early (it never does here).
#[derive(Debug, Clone)]
pub struct ConnState {
    pub security: String,
    pub stream_multiplexer: String,
    pub transport: Option<&'static str>,
    /// This upgrader always negotiates the muxer after security, never
    /// before (no "early muxer negotiation" optimization is implemented),
    /// so this is always `false`. The field exists so callers that branch
    /// on it (mirroring upstream libp2p's `Conn.state`) compile unchanged.
    pub used_early_muxer_negotiation: bool,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// The connection object the upgrader produces: an immutable identity
/// triple plus the muxed session it wraps.
pub struct Conn {
    id: u64,
    local_peer: PeerId,
    remote_peer: PeerId,
    local_multiaddr: Multiaddr,
    remote_multiaddr: Multiaddr,
    state: ConnState,
    scope: Arc<dyn ConnectionScope>,
    session: Session,
}

impl Conn {
    /// Opaque id, unique within this process, for logging/correlation.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    pub fn local_multiaddr(&self) -> &Multiaddr {
        &self.local_multiaddr
    }

    pub fn remote_multiaddr(&self) -> &Multiaddr {
        &self.remote_multiaddr
    }

    pub fn state(&self) -> &ConnState {
        &self.state
    }

    /// The resource-accounting scope this connection was built with.
    pub fn scope(&self) -> &Arc<dyn ConnectionScope> {
        &self.scope
    }

    /// Open a new locally-initiated stream.
    pub fn new_stream(&self) -> Result<MuxStream> {
        self.session.open_stream()
    }

    /// Wait for the next remote-opened stream.
    pub async fn accept_stream(&self) -> Result<MuxStream> {
        self.session.accept_stream().await
    }

    /// Tear the connection (and its underlying session) down.
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

/// Outbound (dialer) half of the upgrade: negotiate, secure, mux, in that
/// order, over `pipe`. Fails with [`Error::PeerIdMismatch`] if
/// `expected_remote_peer` is supplied and does not match what the
/// security collaborator authenticates.
pub async fn upgrade_outbound<P: Pipe>(
    pipe: P,
    local_peer: PeerId,
    expected_remote_peer: Option<&PeerId>,
    config: &UpgradeConfig,
    local_multiaddr: Multiaddr,
    remote_multiaddr: Multiaddr,
) -> Result<Conn> {
    upgrade_outbound_scoped(
        pipe,
        local_peer,
        expected_remote_peer,
        config,
        local_multiaddr,
        remote_multiaddr,
        Arc::new(NullScope),
    )
    .await
}

/// As [`upgrade_outbound`], additionally wiring in a resource-accounting
/// [`ConnectionScope`].
pub async fn upgrade_outbound_scoped<P: Pipe>(
    pipe: P,
    local_peer: PeerId,
    expected_remote_peer: Option<&PeerId>,
    config: &UpgradeConfig,
    local_multiaddr: Multiaddr,
    remote_multiaddr: Multiaddr,
    scope: Arc<dyn ConnectionScope>,
) -> Result<Conn> {
    let transport = transport_tag(&remote_multiaddr);
    let mut negotiated = PushbackPipe::new(pipe);

    let chosen_security = match select_one_of(&mut negotiated, &config.security_ids(), config.negotiation).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            let _ = negotiated.shutdown().await;
            return Err(Error::UpgradeFailed("security"));
        }
        Err(e) => {
            let _ = negotiated.shutdown().await;
            return Err(e);
        }
    };
    debug!(protocol = %chosen_security, "negotiated outbound security protocol");
    let security = config
        .find_security(&chosen_security)
        .expect("negotiated protocol id must be present in config.security_protocols");

    let boxed: BoxedPipe = Box::new(negotiated);
    let (mut secured, remote_peer) = security.secure_outbound(boxed, expected_remote_peer).await?;
    if let Some(expected) = expected_remote_peer {
        if expected != &remote_peer {
            warn!(%remote_peer, "secured remote peer id did not match expected");
            return Err(Error::PeerIdMismatch);
        }
    }

    let chosen_muxer = match select_one_of(&mut secured, &config.muxer_ids(), config.negotiation).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            let _ = secured.shutdown().await;
            return Err(Error::UpgradeFailed("muxer"));
        }
        Err(e) => {
            let _ = secured.shutdown().await;
            return Err(e);
        }
    };
    debug!(protocol = %chosen_muxer, "negotiated outbound muxer protocol");
    let muxer = config
        .find_muxer(&chosen_muxer)
        .expect("negotiated protocol id must be present in config.muxer_protocols");
    let session = muxer.create(secured, Role::Initiator, config.session, scope.dupe())?;

    Ok(Conn {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        local_peer,
        remote_peer,
        local_multiaddr,
        remote_multiaddr,
        state: ConnState {
            security: chosen_security,
            stream_multiplexer: chosen_muxer,
            transport,
            used_early_muxer_negotiation: false,
        },
        scope,
        session,
    })
}

/// Inbound (listener) half of the upgrade.
pub async fn upgrade_inbound<P: Pipe>(
    pipe: P,
    local_peer: PeerId,
    config: &UpgradeConfig,
    local_multiaddr: Multiaddr,
    remote_multiaddr: Multiaddr,
) -> Result<Conn> {
    upgrade_inbound_scoped(
        pipe,
        local_peer,
        config,
        local_multiaddr,
        remote_multiaddr,
        Arc::new(NullScope),
    )
    .await
}

/// As [`upgrade_inbound`], additionally wiring in a resource-accounting
/// [`ConnectionScope`].
pub async fn upgrade_inbound_scoped<P: Pipe>(
    pipe: P,
    local_peer: PeerId,
    config: &UpgradeConfig,
    local_multiaddr: Multiaddr,
    remote_multiaddr: Multiaddr,
    scope: Arc<dyn ConnectionScope>,
) -> Result<Conn> {
    let transport = transport_tag(&remote_multiaddr);
    let mut negotiated = PushbackPipe::new(pipe);

    let chosen_security = match listener_negotiate(
        &mut negotiated,
        |token| config.security_protocols.iter().any(|e| e.protocol_id == token),
        config.negotiation,
    )
    .await
    {
        Ok(id) => id,
        Err(e) => {
            let _ = negotiated.shutdown().await;
            return Err(e);
        }
    };
    debug!(protocol = %chosen_security, "negotiated inbound security protocol");
    let security = config
        .find_security(&chosen_security)
        .expect("negotiated protocol id must be present in config.security_protocols");

    let boxed: BoxedPipe = Box::new(negotiated);
    let (mut secured, remote_peer) = security.secure_inbound(boxed).await?;

    let chosen_muxer = match listener_negotiate(
        &mut secured,
        |token| config.muxer_protocols.iter().any(|e| e.protocol_id == token),
        config.negotiation,
    )
    .await
    {
        Ok(id) => id,
        Err(e) => {
            let _ = secured.shutdown().await;
            return Err(e);
        }
    };
    debug!(protocol = %chosen_muxer, "negotiated inbound muxer protocol");
    let muxer = config
        .find_muxer(&chosen_muxer)
        .expect("negotiated protocol id must be present in config.muxer_protocols");
    let session = muxer.create(secured, Role::Responder, config.session, scope.dupe())?;

    Ok(Conn {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        local_peer,
        remote_peer,
        local_multiaddr,
        remote_multiaddr,
        state: ConnState {
            security: chosen_security,
            stream_multiplexer: chosen_muxer,
            transport,
            used_early_muxer_negotiation: false,
        },
        scope,
        session,
    })
}
