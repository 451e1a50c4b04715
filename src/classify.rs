//! The memory-kind classification collaborator (`spec.md` §1, §4.5, §9).
//!
//! Kind discovery ("is this address host memory, or does it belong to some
//! device's allocator") is explicitly out of scope for the cache itself; the
//! cache only consumes this trait.

use crate::error::CallbackError;

/// A memory-kind descriptor, comparable for equality (`spec.md` §3).
///
/// `Host` is the singleton descriptor for ordinary process memory. `Device`
/// descriptors must be distinct per live allocation of the same family, so
/// that a new device allocation at a previously-used virtual address never
/// collides with the stale descriptor of a freed one (`spec.md` §4.5(1)).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemKind {
    /// Ordinary host memory.
    Host,
    /// A device-owned allocation.
    Device(DeviceAllocation),
}

/// Identifies one live device allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAllocation {
    /// Opaque device-family identifier (e.g. distinguishing GPU families),
    /// defined entirely by the classifier implementation.
    pub family: u32,
    /// Identifier unique among currently-live allocations of this family.
    /// The classifier must never reuse an `allocation_id` for a new
    /// allocation while the cache might still hold a stale region tagged
    /// with the old one.
    pub allocation_id: u64,
}

/// Outcome of classifying a range.
pub enum ClassifyOutcome {
    /// The range belongs to a recognized memory kind.
    Known(MemKind),
    /// The classifier has no opinion on this range. Per `spec.md` §7 this is
    /// converted to [`MemKind::Host`] by the cache and never surfaces as an
    /// error to the caller.
    NotFound,
}

/// Classifies a virtual-address range into a memory kind.
///
/// Invoked on both the fast and slow `get` paths, so implementations must be
/// cheap and non-blocking; the slow-path invocation additionally happens
/// with the page-table write lock held, so a classifier must never call back
/// into the cache it serves (`spec.md` §5).
pub trait Classifier: Send + Sync {
    /// Classify `[start, end)`.
    fn classify(&self, start: u64, end: u64) -> Result<ClassifyOutcome, CallbackError>;
}
