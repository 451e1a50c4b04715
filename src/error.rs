//! Error types surfaced by the cache.

use std::fmt;

/// Boxed error returned by a failing user callback (register or classify).
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type RcacheResult<T> = Result<T, RcacheError>;

/// Errors `rcache` surfaces to callers.
///
/// `spec.md` §6/§7 name a C-style status taxonomy: `ok`, `no-resource`,
/// `io-error`, `invalid-argument`, `permission-error` (folded into `io-error`
/// in that taxonomy). This enum keeps `PermissionMismatch` distinct because
/// Rust's `Result<T, E>` has no cost for a richer error type, but every
/// variant below still corresponds 1:1 to one of the spec's named outcomes.
#[derive(Debug, thiserror::Error)]
pub enum RcacheError {
    /// Cache or event-source resource allocation failed (`no-resource`).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The user's `Registrar::register` callback returned an error
    /// (`io-error`).
    #[error("register callback failed: {0}")]
    UserCallbackFailed(#[source] CallbackError),

    /// The classification callback failed to classify the requested range
    /// (distinct from "not found", which is silently folded into the host
    /// memory kind per `spec.md` §7 and never reaches this type).
    #[error("classification failed: {0}")]
    ClassificationFailed(#[source] CallbackError),

    /// The OS-reported protection for the affected pages does not dominate
    /// the requested (or merged) `prot` (`permission-error`, rolled into
    /// `io-error` in the spec's C-style taxonomy).
    #[error("requested protection not supported by the underlying mapping")]
    PermissionMismatch,

    /// A malformed request: zero length, misaligned bound, or an invalid
    /// parameter bundle at creation time (`invalid-argument`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Abort the process after logging, per `spec.md` §7: "an over-subscribed
/// queue or an allocation failure during invalidation is a fatal condition
/// ... invalidations cannot be silently dropped without violating the core
/// safety invariant that `get` never returns a stale region." Used only for
/// conditions that would otherwise let a stale region remain observable.
pub(crate) fn fatal(msg: impl fmt::Display) -> ! {
    log::error!("rcache: fatal: {msg}");
    std::process::abort();
}
