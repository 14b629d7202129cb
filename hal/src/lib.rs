//! # r0rt Host Abstraction Layer
//!
//! The HAL hides the per-OS kernel primitives the runtime depends on behind a
//! small set of traits, so that subsystems are written once and run on every
//! host kernel the hypervisor supports.
//!
//! ## Collaborators
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Platform                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────┐  ┌─────────┐  │
//! │  │ ClockSource  │  │   MpServices     │  │ NativeTimer  │  │ SpinLock│  │
//! │  │              │  │                  │  │   Backend    │  │ Provider│  │
//! │  │ now_ns()     │  │ run_on_cpu()     │  │ create()     │  │ create()│  │
//! │  │ granularity  │  │ run_on_all()     │  │ arm/cancel   │  │         │  │
//! │  │              │  │ online_set()     │  │ native ticks │  │         │  │
//! │  │              │  │ hotplug listener │  │              │  │         │  │
//! │  └──────────────┘  └──────────────────┘  └──────────────┘  └─────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A host backend implements the four traits; the blanket [`Platform`]
//! impl then makes it usable by every subsystem as `Arc<dyn Platform>`.
//!
//! The `sim` feature provides a deterministic simulated host with a virtual
//! clock, CPU hotplug and synchronous cross-calls, used to test subsystems
//! off-target.

#![cfg_attr(not(any(test, feature = "sim")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod clock;
pub mod cpu;
pub mod error;
pub mod mp;
pub mod native;
pub mod spinlock;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use clock::{ClockSource, NS_PER_MS, NS_PER_SEC, NS_PER_US};
pub use cpu::{CpuId, CpuSet, MAX_CPUS};
pub use error::{HalError, HalResult};
pub use mp::{ListenerId, MpEvent, MpListener, MpServices};
pub use native::{
    ns_to_ticks, ticks_before, Expiry, NativeResolution, NativeTicks, NativeTimer,
    NativeTimerBackend, NativeTimerHandler, MAX_TICK_OFFSET,
};
pub use spinlock::{SpinLock, SpinLockGuard, SpinLockProvider};

// =============================================================================
// Platform
// =============================================================================

/// Everything a subsystem needs from the host kernel.
///
/// Implemented automatically for any type providing the four collaborator
/// traits.
pub trait Platform: ClockSource + MpServices + NativeTimerBackend + SpinLockProvider {}

impl<T> Platform for T where T: ClockSource + MpServices + NativeTimerBackend + SpinLockProvider {}
