//! `rcache`: an in-process registration cache.
//!
//! Memoizes the (often expensive) act of registering a virtual-address range
//! with an external resource (a NIC's RDMA stack, a device driver, anything
//! that needs to pin and describe a range before it can touch it), so that
//! repeated requests over the same or overlapping ranges reuse a prior
//! registration instead of repeating the underlying syscall or ioctl.
//!
//! The cache itself never touches memory, never talks to hardware, and never
//! discovers VM events on its own. It is driven entirely through four
//! capability interfaces the caller supplies at [`Cache::create`] time:
//! [`Classifier`](classify::Classifier) distinguishes host memory from
//! device allocations, [`Registrar`](callback::Registrar) performs the
//! actual register/deregister side effect, [`ProtectionOracle`](callback::ProtectionOracle)
//! reports OS-level page protection, and [`EventSource`](event::EventSource)
//! delivers unmap and memory-kind-free notifications.
//!
//! ```no_run
//! use rcache::{Cache, CacheParams, ProtectionFlags, EventMask, CacheFlags};
//! # use std::sync::Arc;
//! # fn wire_up() -> rcache::RcacheResult<()> {
//! # let classifier = unimplemented!();
//! # let protection_oracle = unimplemented!();
//! # let registrar = unimplemented!();
//! # let event_source = unimplemented!();
//! let cache = Cache::create(
//!     CacheParams {
//!         region_payload_size: 64,
//!         alignment: 4096,
//!         max_alignment: 1 << 30,
//!         event_mask: EventMask::UNMAP,
//!         max_regions: Some(4096),
//!         flags: CacheFlags::empty(),
//!         classifier,
//!         protection_oracle,
//!         registrar,
//!         event_source,
//!     },
//!     "nic0",
//! )?;
//!
//! let handle = cache.get(0x7f0000, 4096, ProtectionFlags::RW)?;
//! // ... use the registration through `handle.payload()` ...
//! cache.put(handle);
//! cache.destroy();
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod cache;
pub mod classify;
pub mod error;
pub mod event;
pub mod flags;
pub mod params;
mod region;
mod stats;
#[cfg(test)]
mod test_support;

pub use cache::{Cache, RegionHandle};
pub use callback::{ProtectionOracle, Registrar};
pub use classify::{Classifier, ClassifyOutcome, DeviceAllocation, MemKind};
pub use error::{CallbackError, RcacheError, RcacheResult};
pub use event::{EventHandler, EventSource, SubscriptionToken, VmEvent, VmEventKind};
pub use flags::{CacheFlags, EventMask, ProtectionFlags, RegionFlags};
pub use params::{CacheParams, MIN_ALIGNMENT};
pub use region::Region;
pub use stats::CacheStats;
