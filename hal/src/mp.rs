//! # Multi-Processor Services
//!
//! Cross-calls ("run this on CPU X and wait"), online-CPU queries and CPU
//! hotplug notification.
//!
//! ## Cross-call contract
//!
//! Both [`MpServices::run_on_cpu`] and [`MpServices::run_on_all`] are
//! synchronous barriers: they return only after every target CPU has finished
//! executing the work item. While the work item runs,
//! [`MpServices::current_cpu`] reports the target CPU.
//!
//! ## Hotplug listeners
//!
//! Listeners are invoked from the hotplug notifier context, which may block
//! briefly (spinlocks, cross-calls). An `Offline` event is delivered while
//! the CPU can still execute work, before its pending timers are migrated.

use alloc::sync::Arc;
use core::fmt;

use crate::cpu::{CpuId, CpuSet};
use crate::error::HalResult;

// =============================================================================
// Events
// =============================================================================

/// CPU hotplug event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpEvent {
    /// The CPU came online
    Online,
    /// The CPU is going offline
    Offline,
}

impl fmt::Display for MpEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpEvent::Online => write!(f, "online"),
            MpEvent::Offline => write!(f, "offline"),
        }
    }
}

/// Receiver of CPU hotplug events
pub trait MpListener: Send + Sync {
    /// Handle a hotplug transition of `cpu`
    fn on_mp_event(&self, event: MpEvent, cpu: CpuId);
}

/// Registration token returned by [`MpServices::register_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

// =============================================================================
// MP Services
// =============================================================================

/// Host multi-processor services
pub trait MpServices: Send + Sync {
    /// CPU the caller is executing on
    fn current_cpu(&self) -> CpuId;

    /// Highest possible CPU id (online or not)
    fn max_cpu_id(&self) -> CpuId;

    /// Check if a CPU is online
    fn is_cpu_online(&self, cpu: CpuId) -> bool;

    /// Snapshot of the online CPUs
    fn online_set(&self) -> CpuSet;

    /// Run `work` on every online CPU and wait for all of them
    fn run_on_all(&self, work: &(dyn Fn(CpuId) + Sync)) -> HalResult<()>;

    /// Run `work` on `cpu` and wait for it
    ///
    /// Fails with `CpuNotFound` for ids above [`MpServices::max_cpu_id`] and
    /// `CpuOffline` for CPUs that are not online.
    fn run_on_cpu(&self, cpu: CpuId, work: &(dyn Fn(CpuId) + Sync)) -> HalResult<()>;

    /// Register a hotplug listener
    fn register_listener(&self, listener: Arc<dyn MpListener>) -> HalResult<ListenerId>;

    /// Remove a hotplug listener
    ///
    /// Once this returns no new event is delivered to the listener, but an
    /// invocation already in flight may still complete.
    fn deregister_listener(&self, id: ListenerId) -> HalResult<()>;
}
