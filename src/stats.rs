//! The statistics surface (`spec.md` §6, optional counters).

use std::sync::atomic::{AtomicU64, Ordering};

/// Live, atomically-updated counters backing [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub gets: AtomicU64,
    pub fast_hits: AtomicU64,
    pub slow_hits: AtomicU64,
    pub misses: AtomicU64,
    pub merges: AtomicU64,
    pub unmap_events: AtomicU64,
    pub invalidations: AtomicU64,
    pub puts: AtomicU64,
    pub registers: AtomicU64,
    pub deregisters: AtomicU64,
    pub max_regions_warnings: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            gets: self.gets.load(Ordering::Relaxed),
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            slow_hits: self.slow_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            unmap_events: self.unmap_events.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            registers: self.registers.load(Ordering::Relaxed),
            deregisters: self.deregisters.load(Ordering::Relaxed),
            max_regions_warnings: self.max_regions_warnings.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a cache's counters (`SPEC_FULL.md` §10.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total `get` calls.
    pub gets: u64,
    /// `get` calls satisfied by the read-locked fast path.
    pub fast_hits: u64,
    /// `get` calls satisfied by a single fully-covering region found on the
    /// write-locked slow path.
    pub slow_hits: u64,
    /// `get` calls that created a fresh region (no overlap at all).
    pub misses: u64,
    /// `get` calls that absorbed one or more overlapping regions.
    pub merges: u64,
    /// VM unmap/memory-kind-free events observed (including programmatic
    /// `invalidate_range` calls).
    pub unmap_events: u64,
    /// Regions moved from the page table to the invalidation queue.
    pub invalidations: u64,
    /// Total `put` calls.
    pub puts: u64,
    /// Successful register callback invocations.
    pub registers: u64,
    /// Deregister callback invocations.
    pub deregisters: u64,
    /// Times the `max_regions` soft cap was crossed.
    pub max_regions_warnings: u64,
}
