//! Connection-level resource accounting hook.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! A collaborator that resource-managers (libp2p's own terminology:
//! "resource manager scopes") plug into: reserve/release memory against a
//! budget, open tracing spans, and report stats. This crate does not
//! implement a resource manager itself; it only defines the trait the
//! session calls through, plus a no-op default so the muxer is usable
//! without one, the same shape as accepting an optional collaborator
//! rather than hard-wiring one in.

use tracing::Span;

use crate::error::Result;

/// Snapshot of a connection scope's resource usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeStat {
    pub memory_reserved: usize,
    pub streams_open: usize,
}

/// Connection-level resource accounting. Implementations may deny a
/// reservation (e.g. a global memory budget is exhausted), in which case
/// the session refuses to open the stream or buffer the frame that
/// triggered the call.
pub trait ConnectionScope: Send + Sync {
    /// Reserve `amount` bytes against this connection's budget.
    fn reserve_memory(&self, amount: usize) -> Result<()>;

    /// Release a previously reserved amount.
    fn release_memory(&self, amount: usize);

    /// Open a tracing span for a unit of work attributed to this
    /// connection (e.g. one stream's lifetime).
    fn begin_span(&self, name: &'static str) -> Span;

    /// Current resource usage snapshot.
    fn stat(&self) -> ScopeStat;
}

/// A scope that never denies a reservation and reports nothing. The
/// default when no resource manager is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScope;

impl ConnectionScope for NullScope {
    fn reserve_memory(&self, _amount: usize) -> Result<()> {
        Ok(())
    }

    fn release_memory(&self, _amount: usize) {}

    fn begin_span(&self, name: &'static str) -> Span {
        tracing::debug_span!("scope", unit = name)
    }

    fn stat(&self) -> ScopeStat {
        ScopeStat::default()
    }
}
