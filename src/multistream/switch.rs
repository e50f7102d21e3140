//! Protocol switch: registry of protocol ids to handler callbacks.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Mutated under a single mutex, matching the locking discipline the
//! teacher uses for its own flow table (`flows: Arc<RwLock<HashMap<u32,
//! FlowSlot>>>` in `mux/inner.rs`); lookups are short critical sections
//! that release the lock before any `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::NegotiationConfig;
use crate::dupe::Dupe;
use crate::error::Result;

use super::negotiate::listener_negotiate;

/// A protocol handler: given a stream that has already settled on a
/// protocol id, do whatever the application wants with it.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Object-safe handler callback.
pub trait Handler<S>: Send + Sync {
    /// Invoked with the negotiated protocol id and the stream.
    fn handle(&self, protocol: &str, stream: S) -> HandlerFuture;
}

impl<S, F, Fut> Handler<S> for F
where
    F: Fn(&str, S) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, protocol: &str, stream: S) -> HandlerFuture {
        Box::pin(self(protocol, stream))
    }
}

/// A custom match predicate, used for protocol ids that are not compared
/// by exact string equality (e.g. semver ranges, path prefixes).
pub type MatchFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

struct Entry<S> {
    handler: Arc<dyn Handler<S>>,
    matcher: Option<MatchFn>,
}

/// Registry of protocol id to handler, plus optional custom match
/// predicates. Adding a handler under an id that is already registered
/// replaces the previous entry.
pub struct Switch<S> {
    entries: RwLock<HashMap<String, Entry<S>>>,
    config: NegotiationConfig,
}

impl<S> Switch<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create an empty switch using the given negotiator configuration.
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a handler for an exact protocol id. Replaces any existing
    /// handler registered under the same id.
    pub fn add_handler(&self, protocol_id: impl Into<String>, handler: Arc<dyn Handler<S>>) {
        self.entries.write().insert(
            protocol_id.into(),
            Entry {
                handler,
                matcher: None,
            },
        );
    }

    /// Register a handler under `protocol_id`, additionally consulted via
    /// `matches` for any candidate token that does not exact-match any
    /// registered id.
    pub fn add_handler_with_func(
        &self,
        protocol_id: impl Into<String>,
        matches: impl Fn(&str) -> bool + Send + Sync + 'static,
        handler: Arc<dyn Handler<S>>,
    ) {
        self.entries.write().insert(
            protocol_id.into(),
            Entry {
                handler,
                matcher: Some(Arc::new(matches)),
            },
        );
    }

    /// Remove a previously registered handler.
    pub fn remove_handler(&self, protocol_id: &str) {
        self.entries.write().remove(protocol_id);
    }

    /// List the currently registered protocol ids.
    pub fn protocols(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Run listener-side negotiation over `stream` without dispatching to
    /// a handler; returns the agreed protocol id.
    pub async fn negotiate(&self, stream: &mut S) -> Result<String> {
        let entries = &self.entries;
        listener_negotiate(
            stream,
            |token| {
                let guard = entries.read();
                if guard.contains_key(token) {
                    return true;
                }
                guard
                    .values()
                    .any(|entry| entry.matcher.as_ref().is_some_and(|m| m(token)))
            },
            self.config,
        )
        .await
    }

    /// Negotiate, then invoke the matching handler with `(protocol,
    /// stream)`. This is the usual entry point for a freshly accepted
    /// stream.
    pub async fn handle(&self, mut stream: S) -> Result<()> {
        let protocol = self.negotiate(&mut stream).await?;
        let handler = {
            let guard = self.entries.read();
            guard
                .get(&protocol)
                .map(|e| e.handler.dupe())
                .or_else(|| {
                    guard
                        .values()
                        .find(|entry| entry.matcher.as_ref().is_some_and(|m| m(&protocol)))
                        .map(|e| e.handler.dupe())
                })
        };
        if let Some(handler) = handler {
            handler.handle(&protocol, stream).await;
        }
        Ok(())
    }
}
