//! Bit-flag types shared across the cache's public and internal surfaces.

use bitflags::bitflags;

bitflags! {
    /// Access modes a registration supports.
    ///
    /// Mirrors `helix_memory::protection::ProtectionFlags`, generalized from a
    /// CPU page-table permission bitset to the access rights an external
    /// registration (NIC, device driver) can grant over a range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtectionFlags: u32 {
        /// No access.
        const NONE = 0;
        /// Read access.
        const READ = 1 << 0;
        /// Write access.
        const WRITE = 1 << 1;
        /// Execute access.
        const EXECUTE = 1 << 2;
        /// Read + write.
        const RW = Self::READ.bits() | Self::WRITE.bits();
        /// Read + execute.
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
        /// Read + write + execute.
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

bitflags! {
    /// Per-region lifecycle flags (`spec.md` §3), stored atomically on [`crate::Region`]
    /// so a concurrent reader can observe them without the page-table lock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u8 {
        /// The region is present in the page table and visible to lookups.
        const IN_PGTABLE = 1 << 0;
        /// The region has been logically removed, awaiting deregistration.
        const INVALID = 1 << 1;
        /// The register callback is in progress; not yet eligible for a hit.
        const REGISTERING = 1 << 2;
    }
}

bitflags! {
    /// VM events a cache subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        /// A range was unmapped.
        const UNMAP = 1 << 0;
        /// A memory-kind (device) allocation was freed.
        const MEM_KIND_FREE = 1 << 1;
    }
}

bitflags! {
    /// Cache-wide policy bits (`spec.md` §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u32 {
        /// Permit merges that widen `prot` past what the OS reports as
        /// supported for every page in the merged interval. Default unset
        /// (strict); see the Open Question in `spec.md` §9.
        const ALLOW_PROT_WIDENING = 1 << 0;
        /// Caller promises never to deregister synchronously from inside an
        /// event-delivery context. This cache never does so regardless; the
        /// bit exists for API compatibility with callers that set it
        /// defensively (see SPEC_FULL.md §10.5).
        const NO_SYNC_DEREGISTER_IN_EVENTS = 1 << 1;
    }
}
