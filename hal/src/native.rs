//! # Native Timer Primitives
//!
//! Each host kernel has its own single-shot timer object. Two families exist:
//!
//! | Family     | Expiry expressed in          | Example                     |
//! |------------|------------------------------|-----------------------------|
//! | High-res   | absolute monotonic ns        | Linux `hrtimer`             |
//! | Tick-based | free-running native ticks    | Linux `timer_list`/jiffies  |
//!
//! Subsystems program against [`NativeTimer`] and pick the expiry form from
//! [`NativeTimerBackend::native_resolution`]. The free-running tick counter
//! wraps, so tick deadlines are compared with [`ticks_before`].
//!
//! A native timer is disarmed before its handler runs; a handler that wants
//! another expiry re-arms the timer itself.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::error::{HalError, HalResult};

// =============================================================================
// Native Ticks
// =============================================================================

/// Value of the host's free-running tick counter
pub type NativeTicks = u32;

/// Largest tick offset that can be programmed relative to "now"
pub const MAX_TICK_OFFSET: NativeTicks = ((i32::MAX as u32) >> 1) - 1;

/// Wrap-safe "a is before b" on the free-running tick counter
#[inline]
pub const fn ticks_before(a: NativeTicks, b: NativeTicks) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Convert nanoseconds to native ticks, rounding up and clamping to
/// [`MAX_TICK_OFFSET`]
pub fn ns_to_ticks(ns: u64, tick_ns: u32) -> NativeTicks {
    if tick_ns == 0 {
        return 0;
    }
    let tick_ns = tick_ns as u64;
    if ns > tick_ns * MAX_TICK_OFFSET as u64 {
        return MAX_TICK_OFFSET;
    }
    ns.div_ceil(tick_ns) as NativeTicks
}

/// Resolution class of the host timer facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResolution {
    /// Expiries are absolute nanoseconds
    HighRes {
        /// Reported clock resolution
        resolution_ns: u32,
    },
    /// Expiries are native tick counts
    Ticks {
        /// Length of one tick
        tick_ns: u32,
    },
}

impl NativeResolution {
    /// Tick-based resolution for a host running at `hz` ticks per second
    pub const fn from_hz(hz: u32) -> Self {
        NativeResolution::Ticks {
            tick_ns: (crate::clock::NS_PER_SEC / hz as u64) as u32,
        }
    }

    /// Check for a high resolution facility
    pub const fn is_high_res(&self) -> bool {
        matches!(self, NativeResolution::HighRes { .. })
    }

    /// Granularity in nanoseconds
    pub const fn granularity_ns(&self) -> u32 {
        match self {
            NativeResolution::HighRes { resolution_ns } => *resolution_ns,
            NativeResolution::Ticks { tick_ns } => *tick_ns,
        }
    }
}

// =============================================================================
// Native Timer
// =============================================================================

/// When a native timer should expire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// Absolute monotonic nanoseconds (high-res hosts)
    AtNs(u64),
    /// Absolute native tick count (tick-based hosts)
    AtTick(NativeTicks),
}

/// Code run when a native timer expires
///
/// Runs in timer-fire context: no blocking, no sleeping allocation.
pub trait NativeTimerHandler: Send + Sync {
    /// The timer expired on the current CPU
    fn on_expiry(&self);
}

/// One host timer object, bound to the CPU it was last armed on
pub trait NativeTimer: Send + Sync {
    /// Arm (or re-arm) the timer
    ///
    /// The timer is queued on the calling CPU. A `pinned` timer stays there;
    /// an unpinned one may be moved by the host.
    fn arm(&self, expiry: Expiry, pinned: bool);

    /// Disarm the timer and wait until no handler invocation is in flight
    ///
    /// A handler that re-arms the timer while this runs is disarmed again;
    /// when this returns the timer is idle.
    fn cancel_sync(&self);

    /// Check whether the timer is armed
    fn is_pending(&self) -> bool;
}

/// Host facility creating native timers
pub trait NativeTimerBackend: Send + Sync {
    /// Resolution class of this host
    fn native_resolution(&self) -> NativeResolution;

    /// Current value of the free-running tick counter
    fn native_ticks(&self) -> NativeTicks;

    /// Create an idle timer that calls `handler` on expiry
    fn create_native_timer(&self, handler: Arc<dyn NativeTimerHandler>) -> Box<dyn NativeTimer>;

    /// Ask the host for a finer system timer granularity
    ///
    /// Returns the granted granularity, which must be handed back to
    /// [`NativeTimerBackend::release_granularity`].
    fn request_granularity(&self, _request_ns: u32) -> HalResult<u32> {
        Err(HalError::NotSupported)
    }

    /// Return a grant obtained from [`NativeTimerBackend::request_granularity`]
    fn release_granularity(&self, _granted_ns: u32) -> HalResult<()> {
        Err(HalError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_before_wraps() {
        assert!(ticks_before(1, 2));
        assert!(!ticks_before(2, 1));
        assert!(!ticks_before(5, 5));
        // 0xffff_fff0 is before 0x10 once the counter wrapped
        assert!(ticks_before(0xffff_fff0, 0x10));
        assert!(!ticks_before(0x10, 0xffff_fff0));
    }

    #[test]
    fn test_ns_to_ticks_rounds_up() {
        assert_eq!(ns_to_ticks(0, 4_000_000), 0);
        assert_eq!(ns_to_ticks(1, 4_000_000), 1);
        assert_eq!(ns_to_ticks(4_000_000, 4_000_000), 1);
        assert_eq!(ns_to_ticks(4_000_001, 4_000_000), 2);
        assert_eq!(ns_to_ticks(10, 0), 0);
    }

    #[test]
    fn test_ns_to_ticks_clamps() {
        assert_eq!(ns_to_ticks(u64::MAX, 1_000_000), MAX_TICK_OFFSET);
    }

    #[test]
    fn test_resolution_granularity() {
        assert_eq!(NativeResolution::from_hz(250).granularity_ns(), 4_000_000);
        assert_eq!(NativeResolution::from_hz(1000).granularity_ns(), 1_000_000);
        let hr = NativeResolution::HighRes { resolution_ns: 1 };
        assert!(hr.is_high_res());
        assert_eq!(hr.granularity_ns(), 1);
    }
}
