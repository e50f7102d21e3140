//! Cheap, explicit duplication for handle-like types.
//!
//! `Clone` is sometimes expensive and sometimes free, and the call site
//! cannot tell which just by reading `.clone()`. `Dupe` is implemented only
//! for types where cloning is a refcount bump or a cheap copy (channel
//! endpoints, `Arc`s, atomics), so `.dupe()` at a call site is a promise that
//! nothing heavy is happening.

use std::sync::Arc;
use tokio::sync::mpsc;

/// Marker-ish trait for cheap duplication of handle-like values.
pub trait Dupe {
    /// Duplicate `self`. Must be O(1) (a refcount bump or a `Copy`).
    fn dupe(&self) -> Self;
}

impl<T: ?Sized> Dupe for Arc<T> {
    #[inline]
    fn dupe(&self) -> Self {
        Arc::clone(self)
    }
}

impl<T> Dupe for mpsc::Sender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}

impl<T> Dupe for mpsc::UnboundedSender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}
