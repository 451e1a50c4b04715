//! The registration and OS-protection-oracle collaborators (`spec.md` §1, §9).
//!
//! The cache invokes a user-supplied pair of callbacks to perform the actual
//! registration of a range with an external resource; it never interprets
//! the opaque side effect they produce beyond the success/failure outcome.

use crate::error::CallbackError;
use crate::flags::{ProtectionFlags, RegionFlags};
use crate::region::Region;
use std::fmt;

/// Registers and deregisters ranges with an external resource.
///
/// `register`/`deregister` correspond to `ops.register`/`ops.deregister` in
/// `spec.md` §6; `dump` corresponds to the optional `ops.dump_region`.
pub trait Registrar: Send + Sync {
    /// Perform the registration side effect for `region`, writing any
    /// bookkeeping the external resource hands back into `payload` (sized
    /// per `CacheParams::region_payload_size`).
    ///
    /// `flags` is the region's flags at call time; it always includes
    /// [`RegionFlags::REGISTERING`].
    fn register(
        &self,
        region: &Region,
        payload: &mut [u8],
        flags: RegionFlags,
    ) -> Result<(), CallbackError>;

    /// Undo the registration performed by `register`. Called only after the
    /// region has reached a zero reference count and has already been
    /// removed from the page table; `payload` is exclusively accessible at
    /// this point.
    fn deregister(&self, region: &Region, payload: &mut [u8]);

    /// Optional diagnostics hook (`ops.dump_region` in `spec.md` §6). The
    /// default implementation writes nothing.
    fn dump(&self, _region: &Region, _payload: &[u8], _out: &mut dyn fmt::Write) -> fmt::Result {
        Ok(())
    }
}

/// Reports the OS-visible protection actually available over a range.
///
/// Consulted by the merge path (`spec.md` §4.5 step 4) to enforce that a
/// merged registration never widens `prot` past what every page in the
/// merged interval supports. The returned flags are the *intersection*
/// across every page in `[start, end)`, the protection every page in the
/// range supports simultaneously.
pub trait ProtectionOracle: Send + Sync {
    /// Query the dominant (intersected) protection over `[start, end)`.
    fn prot_for_range(&self, start: u64, end: u64) -> Result<ProtectionFlags, CallbackError>;
}
