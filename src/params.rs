//! Cache creation parameters (`spec.md` §6).

use crate::callback::{ProtectionOracle, Registrar};
use crate::classify::Classifier;
use crate::error::{RcacheError, RcacheResult};
use crate::event::EventSource;
use crate::flags::{CacheFlags, EventMask};
use std::sync::Arc;

/// The minimum permitted alignment: one 4 KiB page.
pub const MIN_ALIGNMENT: u64 = 4096;

static_assertions::const_assert!(MIN_ALIGNMENT.is_power_of_two());

/// Parameter bundle consumed by [`crate::Cache::create`].
///
/// Corresponds to the creation parameters of `spec.md` §6, with the
/// function-pointer `ops` table and opaque `context` re-expressed as the
/// capability interfaces of `spec.md` §9 (`classifier`, `protection_oracle`,
/// `registrar`, `event_source`); see `SPEC_FULL.md` §6 for the full mapping.
pub struct CacheParams {
    /// Bytes of user payload carved out of each region record.
    pub region_payload_size: usize,
    /// Outward alignment applied to every query interval. Must be a power
    /// of two, at least [`MIN_ALIGNMENT`], and no greater than
    /// `max_alignment`.
    pub alignment: u64,
    /// Upper bound enforced on `alignment`.
    pub max_alignment: u64,
    /// VM events to subscribe to. Must contain at least
    /// [`EventMask::UNMAP`].
    pub event_mask: EventMask,
    /// Soft cap on resident regions. Reaching it does not evict; it emits a
    /// one-time warning and a statistic (`SPEC_FULL.md` §10.2).
    pub max_regions: Option<usize>,
    /// Cache-wide policy bits.
    pub flags: CacheFlags,
    /// Memory-kind classifier collaborator.
    pub classifier: Arc<dyn Classifier>,
    /// OS-protection oracle collaborator.
    pub protection_oracle: Arc<dyn ProtectionOracle>,
    /// Register/deregister/dump collaborator.
    pub registrar: Arc<dyn Registrar>,
    /// VM-event subscription collaborator.
    pub event_source: Arc<dyn EventSource>,
}

impl CacheParams {
    /// Validate the bundle, per `spec.md` §6: unknown `event_mask` bits,
    /// non-power-of-two or sub-page `alignment`, or an `alignment` exceeding
    /// `max_alignment` all fail with [`RcacheError::InvalidArgument`].
    pub(crate) fn validate(&self) -> RcacheResult<()> {
        if !self.alignment.is_power_of_two() || self.alignment < MIN_ALIGNMENT {
            return Err(RcacheError::InvalidArgument(format!(
                "alignment {} must be a power of two >= {MIN_ALIGNMENT}",
                self.alignment
            )));
        }
        if self.alignment > self.max_alignment {
            return Err(RcacheError::InvalidArgument(format!(
                "alignment {} exceeds max_alignment {}",
                self.alignment, self.max_alignment
            )));
        }
        let known = EventMask::UNMAP | EventMask::MEM_KIND_FREE;
        if !known.contains(self.event_mask) {
            return Err(RcacheError::InvalidArgument(format!(
                "event_mask contains unknown bits: {:?}",
                self.event_mask.difference(known)
            )));
        }
        if !self.event_mask.contains(EventMask::UNMAP) {
            return Err(RcacheError::InvalidArgument(
                "event_mask must contain at least UNMAP".into(),
            ));
        }
        Ok(())
    }
}
