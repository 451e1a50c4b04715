//! Minimal no-op collaborator implementations shared by this crate's own
//! unit tests. Integration-level fakes with actual recorded behaviour live
//! in `tests/support` instead.
#![cfg(test)]

use crate::callback::{ProtectionOracle, Registrar};
use crate::classify::{Classifier, ClassifyOutcome, MemKind};
use crate::error::CallbackError;
use crate::event::{EventHandler, EventSource, SubscriptionToken};
use crate::flags::{EventMask, ProtectionFlags};
use crate::region::Region;

pub(crate) struct NullClassifier;
impl Classifier for NullClassifier {
    fn classify(&self, _start: u64, _end: u64) -> Result<ClassifyOutcome, CallbackError> {
        Ok(ClassifyOutcome::Known(MemKind::Host))
    }
}

pub(crate) struct NullProtectionOracle;
impl ProtectionOracle for NullProtectionOracle {
    fn prot_for_range(&self, _start: u64, _end: u64) -> Result<ProtectionFlags, CallbackError> {
        Ok(ProtectionFlags::RWX)
    }
}

pub(crate) struct NullRegistrar;
impl Registrar for NullRegistrar {
    fn register(
        &self,
        _region: &Region,
        _payload: &mut [u8],
        _flags: crate::flags::RegionFlags,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    fn deregister(&self, _region: &Region, _payload: &mut [u8]) {}
}

pub(crate) struct NullEventSource;
impl EventSource for NullEventSource {
    fn subscribe(&self, _mask: EventMask, _handler: EventHandler) -> Result<SubscriptionToken, CallbackError> {
        Ok(SubscriptionToken(0))
    }

    fn unsubscribe(&self, _token: SubscriptionToken) {}
}
