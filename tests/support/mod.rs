//! Fake collaborators exercised by the end-to-end scenarios in `scenarios.rs`.
//!
//! Unlike `rcache::test_support`'s null stand-ins, these actually record what
//! they were called with, and can be configured to fail on demand.

use rcache::{
    CallbackError, Classifier, ClassifyOutcome, DeviceAllocation, EventHandler, EventMask,
    EventSource, MemKind, ProtectionFlags, ProtectionOracle, Region, Registrar, SubscriptionToken,
    VmEvent, VmEventKind,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

static LOGGER_INIT: Once = Once::new();

/// Initializes `env_logger` exactly once across every test in the binary,
/// regardless of how many run concurrently under `cargo test`.
pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Classifies ranges as `Host` unless explicitly told otherwise.
#[derive(Default)]
pub struct FakeClassifier {
    device_ranges: Mutex<Vec<(u64, u64, DeviceAllocation)>>,
}

impl FakeClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_device(&self, start: u64, end: u64, family: u32, allocation_id: u64) {
        self.device_ranges
            .lock()
            .unwrap()
            .push((start, end, DeviceAllocation { family, allocation_id }));
    }
}

impl Classifier for FakeClassifier {
    fn classify(&self, start: u64, end: u64) -> Result<ClassifyOutcome, CallbackError> {
        let ranges = self.device_ranges.lock().unwrap();
        // Most recently marked range wins, so a fresh `mark_device` call for
        // an address already covered by a stale allocation takes effect
        // immediately, mirroring how a real classifier would only know about
        // the allocator's current live mapping.
        for (rs, re, alloc) in ranges.iter().rev() {
            if *rs < end && start < *re {
                return Ok(ClassifyOutcome::Known(MemKind::Device(alloc.clone())));
            }
        }
        Ok(ClassifyOutcome::NotFound)
    }
}

/// Reports a fixed protection for every range unless a narrower override was
/// installed for a specific interval.
pub struct FakeProtectionOracle {
    default_prot: ProtectionFlags,
    overrides: Mutex<Vec<(u64, u64, ProtectionFlags)>>,
}

impl FakeProtectionOracle {
    pub fn new(default_prot: ProtectionFlags) -> Arc<Self> {
        Arc::new(Self {
            default_prot,
            overrides: Mutex::new(Vec::new()),
        })
    }

    /// Any range overlapping `[start, end)` reports `prot` instead of the
    /// default, simulating a neighboring page with narrower OS protection.
    pub fn restrict(&self, start: u64, end: u64, prot: ProtectionFlags) {
        self.overrides.lock().unwrap().push((start, end, prot));
    }
}

impl ProtectionOracle for FakeProtectionOracle {
    fn prot_for_range(&self, start: u64, end: u64) -> Result<ProtectionFlags, CallbackError> {
        let mut result = self.default_prot;
        for (rs, re, prot) in self.overrides.lock().unwrap().iter() {
            if *rs < end && start < *re {
                result &= *prot;
            }
        }
        Ok(result)
    }
}

/// Records every register/deregister call; can be told to fail the next
/// `register` call to exercise rollback.
#[derive(Default)]
pub struct FakeRegistrar {
    pub registers: Mutex<Vec<(u64, u64)>>,
    pub deregisters: Mutex<Vec<(u64, u64)>>,
    fail_next_register: AtomicBool,
}

impl FakeRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_register(&self) {
        self.fail_next_register.store(true, Ordering::SeqCst);
    }

    pub fn register_count(&self) -> usize {
        self.registers.lock().unwrap().len()
    }

    pub fn deregister_count(&self) -> usize {
        self.deregisters.lock().unwrap().len()
    }
}

#[derive(Debug)]
struct FakeRegisterError;
impl std::fmt::Display for FakeRegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "simulated registration failure")
    }
}
impl std::error::Error for FakeRegisterError {}

impl Registrar for FakeRegistrar {
    fn register(
        &self,
        region: &Region,
        payload: &mut [u8],
        _flags: rcache::RegionFlags,
    ) -> Result<(), CallbackError> {
        if self.fail_next_register.swap(false, Ordering::SeqCst) {
            return Err(Box::new(FakeRegisterError));
        }
        payload.fill(0xab);
        self.registers.lock().unwrap().push((region.start(), region.end()));
        Ok(())
    }

    fn deregister(&self, region: &Region, _payload: &mut [u8]) {
        self.deregisters.lock().unwrap().push((region.start(), region.end()));
    }
}

/// Lets a test trigger VM events manually instead of waiting on real OS
/// notifications.
#[derive(Default)]
pub struct FakeEventSource {
    handlers: Mutex<Vec<(u64, EventHandler)>>,
    next_token: AtomicU64,
}

impl FakeEventSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire_unmap(&self, start: u64, end: u64) {
        let event = VmEvent { kind: VmEventKind::Unmap, start, end };
        for (_, handler) in self.handlers.lock().unwrap().iter() {
            handler(event);
        }
    }
}

impl EventSource for FakeEventSource {
    fn subscribe(&self, _mask: EventMask, handler: EventHandler) -> Result<SubscriptionToken, CallbackError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().push((token, handler));
        Ok(SubscriptionToken(token))
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.handlers.lock().unwrap().retain(|(t, _)| *t != token.0);
    }
}
