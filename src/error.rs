//! Error taxonomy for the storage engine.

use std::io;
use thiserror::Error;

/// Convenience alias used by every fallible call in the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Every way a store operation can fail.
///
/// Errors always surface to the caller; nothing inside the engine retries.
/// An I/O error leaves the transaction's dirty state intact so the caller
/// can still roll back.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Short read/write, failed sync or resize on the underlying device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Bad magic, bad block marker, inconsistent geometry or a content
    /// identifier mismatch. Reported at open or at decode, never coerced.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// Calling into a closed store, zero key size, invalid options.
    #[error("usage error: {0}")]
    Usage(&'static str),
    /// Key longer than the configured key size.
    #[error("capacity exceeded: {0}")]
    Capacity(&'static str),
}
