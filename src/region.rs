//! The region record (`spec.md` §3, §4.2).

use crate::flags::{ProtectionFlags, RegionFlags};
use crate::classify::MemKind;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// One cached registration.
///
/// Bookkeeping fields (`start`, `end`, `prot`, `mem_kind`) are fixed at
/// construction and never mutate for the lifetime of the record: a change
/// in coverage or protection always creates a new `Region` via merge rather
/// than mutating an existing one (`spec.md` §3 invariant 1 requires page
/// table entries stay pairwise disjoint, which a live mutation could
/// violate without re-validating every neighbour). `refcount` and `flags`
/// are the only mutable state, and both are atomics so a caller holding a
/// reference, and the cache walking the page table, never need to
/// coordinate through the page-table lock to read them.
#[derive(Debug)]
pub struct Region {
    /// Monotonically increasing identity, distinct for every `Region` ever
    /// constructed by a given cache. Two regions that happen to cover the
    /// same address range after an intervening invalidation always compare
    /// unequal by `id` (`spec.md` §8's "fresh identity" property).
    pub(crate) id: u64,
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) prot: ProtectionFlags,
    pub(crate) mem_kind: MemKind,
    pub(crate) refcount: AtomicU32,
    pub(crate) flags: AtomicU8,
    payload: UnsafeCell<Box<[u8]>>,
}

// SAFETY: every field but `payload` is already `Sync`. `payload` is only
// ever mutated through `payload_mut`, which is `pub(crate)`-only and used
// exclusively at two points in the region's life where no other reference
// can be observing it concurrently: by the registering thread before the
// region is published to any caller, and by the draining thread after the
// region's refcount has reached zero and it has been removed from the page
// table (so no outstanding `RegionHandle` can exist). `payload()` is safe
// to call concurrently with itself, just not with `payload_mut`.
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn new(
        id: u64,
        start: u64,
        end: u64,
        prot: ProtectionFlags,
        mem_kind: MemKind,
        payload_size: usize,
    ) -> Self {
        Self {
            id,
            start,
            end,
            prot,
            mem_kind,
            refcount: AtomicU32::new(0),
            flags: AtomicU8::new((RegionFlags::IN_PGTABLE | RegionFlags::REGISTERING).bits()),
            payload: UnsafeCell::new(vec![0u8; payload_size].into_boxed_slice()),
        }
    }

    /// Fresh identity, stable for the lifetime of this record.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Start of the half-open address interval.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// End of the half-open address interval.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Access rights this registration supports.
    pub fn prot(&self) -> ProtectionFlags {
        self.prot
    }

    /// The memory kind this registration was created for.
    pub fn mem_kind(&self) -> &MemKind {
        &self.mem_kind
    }

    /// Current outstanding user reference count.
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Current lifecycle flags.
    pub fn flags(&self) -> RegionFlags {
        RegionFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// User payload populated by [`crate::callback::Registrar::register`].
    ///
    /// Safe to call from any holder of a reference to this region: by the
    /// time such a reference exists, registration has already completed and
    /// no concurrent mutable access to the payload is possible (see the
    /// `Sync` justification above). Concurrent *writes* through the payload
    /// bytes themselves remain the caller's responsibility, per `spec.md`
    /// §5 ("writable concurrency inside the payload is the user's
    /// responsibility").
    pub fn payload(&self) -> &[u8] {
        // SAFETY: see the `Sync` impl's justification; no `payload_mut`
        // call can be concurrently in flight while a `Region` is reachable
        // through a public API surface.
        unsafe { &*self.payload.get() }
    }

    /// Exclusive access to the payload, for use only while registering or
    /// deregistering this region (see the `Sync` impl's justification).
    pub(crate) unsafe fn payload_mut(&self) -> &mut [u8] {
        // SAFETY: forwarded to the caller's obligation, documented above.
        unsafe { &mut *self.payload.get() }
    }

    pub(crate) fn set_flag(&self, flag: RegionFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flag(&self, flag: RegionFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    /// Transition from IN_PGTABLE to INVALID, as performed whenever a
    /// region leaves the page table (event invalidation or merge
    /// supersession; `spec.md` §3 invariant 5).
    pub(crate) fn mark_invalid(&self) {
        self.flags
            .fetch_and(!RegionFlags::IN_PGTABLE.bits(), Ordering::AcqRel);
        self.flags.fetch_or(RegionFlags::INVALID.bits(), Ordering::AcqRel);
    }

    /// Whether `[start, end)` fully covers this region's interval: `start`
    /// and `end` here are the query interval, not the region's own.
    pub(crate) fn fully_covers(&self, start: u64, end: u64) -> bool {
        self.start <= start && end <= self.end
    }

    pub(crate) fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: u64, end: u64) -> Region {
        Region::new(1, start, end, ProtectionFlags::RW, MemKind::Host, 0)
    }

    #[test]
    fn overlap_is_symmetric_and_excludes_touching_ranges() {
        let r = region(10, 20);
        assert!(r.overlaps(15, 25));
        assert!(r.overlaps(0, 15));
        assert!(!r.overlaps(20, 30));
        assert!(!r.overlaps(0, 10));
    }

    #[test]
    fn fully_covers_requires_both_bounds() {
        let r = region(10, 20);
        assert!(r.fully_covers(12, 18));
        assert!(r.fully_covers(10, 20));
        assert!(!r.fully_covers(8, 18));
        assert!(!r.fully_covers(12, 22));
    }

    #[test]
    fn new_region_starts_in_pgtable_and_registering() {
        let r = region(0, 4096);
        let flags = r.flags();
        assert!(flags.contains(RegionFlags::IN_PGTABLE));
        assert!(flags.contains(RegionFlags::REGISTERING));
        assert!(!flags.contains(RegionFlags::INVALID));
    }

    #[test]
    fn mark_invalid_clears_in_pgtable() {
        let r = region(0, 4096);
        r.mark_invalid();
        let flags = r.flags();
        assert!(!flags.contains(RegionFlags::IN_PGTABLE));
        assert!(flags.contains(RegionFlags::INVALID));
    }
}
