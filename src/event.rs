//! The VM-event source collaborator (`spec.md` §1, §4.4, §9).
//!
//! The actual OS-level event delivery (mmap/munmap tracing, device-free
//! hooks) is out of scope; the cache only consumes this subscription
//! interface, exactly as it only consumes [`crate::classify::Classifier`]
//! and [`crate::callback::Registrar`].

use crate::error::CallbackError;
use crate::flags::EventMask;
use std::sync::Arc;

/// A VM event kind the cache may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmEventKind {
    /// A range was unmapped.
    Unmap,
    /// A device-owned allocation covering the range was freed.
    MemKindFree,
}

/// One VM event delivered to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmEvent {
    /// What happened.
    pub kind: VmEventKind,
    /// Start of the affected interval.
    pub start: u64,
    /// End of the affected interval (exclusive).
    pub end: u64,
}

/// Opaque handle returned by [`EventSource::subscribe`], released on
/// [`EventSource::unsubscribe`] during `Cache::destroy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(pub u64);

/// A callback invoked for every delivered [`VmEvent`].
pub type EventHandler = Arc<dyn Fn(VmEvent) + Send + Sync>;

/// Process-wide VM-event source, modeled as an explicitly passed
/// collaborator rather than global init/teardown state (`spec.md` §9).
pub trait EventSource: Send + Sync {
    /// Subscribe `handler` to events matching `mask`.
    fn subscribe(&self, mask: EventMask, handler: EventHandler) -> Result<SubscriptionToken, CallbackError>;

    /// Release a previous subscription.
    fn unsubscribe(&self, token: SubscriptionToken);
}
