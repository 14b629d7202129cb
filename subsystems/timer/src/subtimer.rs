//! # Sub-Timers
//!
//! A sub-timer is the per-CPU unit of arming, cancellation and tick
//! counting. It owns one native timer and the bookkeeping needed to compute
//! drift-free expiries on both native timer families:
//!
//! | Host family | Armed with                 | Next expiry                        |
//! |-------------|----------------------------|------------------------------------|
//! | High-res    | absolute ns                | previous target + interval         |
//! | Tick-based  | free-running native ticks  | previous ticks + interval in ticks |
//!
//! On tick-based hosts an interval that is not an exact multiple of the tick
//! length is tracked in nanoseconds and converted to ticks on every rearm.

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use r0rt_hal::{
    ns_to_ticks, ticks_before, Expiry, NativeResolution, NativeTicks, NativeTimer, Platform,
};

use crate::state::{AtomicState, SubTimerState};

/// Interval parameters shared by every sub-timer of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cadence {
    /// Interval in ns, 0 for one-shot
    pub interval_ns: u64,
    /// Interval in native ticks, 0 unless it is an exact tick multiple
    pub interval_ticks: NativeTicks,
    /// Native timer family
    pub resolution: NativeResolution,
    /// Arm pinned to the current CPU
    pub pinned: bool,
}

impl Cadence {
    pub(crate) fn new(interval_ns: u64, resolution: NativeResolution, pinned: bool) -> Self {
        let interval_ticks = match resolution {
            NativeResolution::Ticks { tick_ns } if tick_ns > 0 => {
                let tick_ns = tick_ns as u64;
                let ticks = interval_ns / tick_ns;
                if ticks * tick_ns == interval_ns && ticks <= NativeTicks::MAX as u64 {
                    ticks as NativeTicks
                } else {
                    0
                }
            },
            _ => 0,
        };

        Self {
            interval_ns,
            interval_ticks,
            resolution,
            pinned,
        }
    }

    pub(crate) const fn is_one_shot(&self) -> bool {
        self.interval_ns == 0
    }
}

/// Per-CPU part of a timer
pub struct SubTimer {
    native: Box<dyn NativeTimer>,
    tick: AtomicU64,
    start_ts: AtomicU64,
    next_ts: AtomicU64,
    next_ticks: AtomicU32,
    pub(crate) state: AtomicState,
}

impl SubTimer {
    pub(crate) fn new(native: Box<dyn NativeTimer>) -> Self {
        Self {
            native,
            tick: AtomicU64::new(0),
            start_ts: AtomicU64::new(0),
            next_ts: AtomicU64::new(0),
            next_ticks: AtomicU32::new(0),
            state: AtomicState::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> SubTimerState {
        self.state.get()
    }

    /// Fires since the last (re)start
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Time of the first expiry after the last (re)start
    pub fn start_ns(&self) -> u64 {
        self.start_ts.load(Ordering::Relaxed)
    }

    /// Target of the pending expiry
    pub fn next_ns(&self) -> u64 {
        self.next_ts.load(Ordering::Relaxed)
    }

    /// Whether the native timer is armed
    pub fn is_armed(&self) -> bool {
        self.native.is_pending()
    }

    pub(crate) fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Arm for `now + first_ns` on the calling CPU and mark `Active`
    ///
    /// The caller owns a `Starting` or `MpStarting` transition.
    pub(crate) fn start(&self, platform: &dyn Platform, cadence: &Cadence, now: u64, first_ns: u64) {
        let next = now.saturating_add(first_ns);
        self.start_ts.store(next, Ordering::Relaxed);
        self.next_ts.store(next, Ordering::Relaxed);
        self.tick.store(0, Ordering::Relaxed);

        let expiry = match cadence.resolution {
            NativeResolution::HighRes { .. } => Expiry::AtNs(next),
            NativeResolution::Ticks { tick_ns } => {
                let delay = if first_ns == 0 { 0 } else { ns_to_ticks(first_ns, tick_ns) };
                let at = platform.native_ticks().wrapping_add(delay);
                self.next_ticks.store(at, Ordering::Relaxed);
                Expiry::AtTick(at)
            },
        };

        self.native.arm(expiry, cadence.pinned);
        self.state.set(SubTimerState::Active);
    }

    /// Cancel synchronously and mark `Stopped`
    ///
    /// The caller owns a `Stopping` or `MpStopping` transition.
    pub(crate) fn stop(&self) {
        self.native.cancel_sync();
        self.state.set(SubTimerState::Stopped);
    }

    /// Wait for any in-flight expiry and leave the native timer disarmed
    pub(crate) fn flush(&self) {
        self.native.cancel_sync();
    }

    /// Program the expiry following fire number `tick`
    pub(crate) fn rearm(&self, platform: &dyn Platform, cadence: &Cadence, tick: u64) {
        let interval = cadence.interval_ns;
        let expiry = match cadence.resolution {
            NativeResolution::HighRes { .. } => {
                let next = self.next_ts.load(Ordering::Relaxed).saturating_add(interval);
                self.next_ts.store(next, Ordering::Relaxed);
                Expiry::AtNs(next)
            },
            NativeResolution::Ticks { tick_ns } => {
                let now = platform.now_ns();
                let ticks_now = platform.native_ticks();

                // Re-anchor on the first fire to absorb a late start.
                if tick == 1 {
                    self.start_ts.store(now, Ordering::Relaxed);
                    self.next_ts.store(now, Ordering::Relaxed);
                    self.next_ticks.store(ticks_now, Ordering::Relaxed);
                }

                let mut next_ts = self.next_ts.load(Ordering::Relaxed).saturating_add(interval);
                let next_ticks = if cadence.interval_ticks != 0 {
                    let mut at = self
                        .next_ticks
                        .load(Ordering::Relaxed)
                        .wrapping_add(cadence.interval_ticks);
                    while ticks_before(at, ticks_now) {
                        at = at.wrapping_add(cadence.interval_ticks);
                        next_ts = next_ts.saturating_add(interval);
                    }
                    at
                } else {
                    while next_ts < now {
                        next_ts = next_ts.saturating_add(interval);
                    }
                    ticks_now.wrapping_add(ns_to_ticks(next_ts - now, tick_ns))
                };

                self.next_ts.store(next_ts, Ordering::Relaxed);
                self.next_ticks.store(next_ticks, Ordering::Relaxed);
                Expiry::AtTick(next_ticks)
            },
        };

        self.native.arm(expiry, cadence.pinned);
    }
}

impl fmt::Debug for SubTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTimer")
            .field("state", &self.state())
            .field("tick", &self.tick())
            .field("next_ns", &self.next_ns())
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use r0rt_hal::sim::{SimConfig, SimPlatform};
    use r0rt_hal::{ClockSource, NativeTimerBackend, NativeTimerHandler, NS_PER_MS};

    struct Nop;

    impl NativeTimerHandler for Nop {
        fn on_expiry(&self) {}
    }

    fn sub_timer(sim: &SimPlatform) -> SubTimer {
        SubTimer::new(sim.create_native_timer(Arc::new(Nop)))
    }

    #[test]
    fn test_cadence_tick_multiple() {
        let res = NativeResolution::from_hz(250);
        assert_eq!(Cadence::new(8 * NS_PER_MS, res, false).interval_ticks, 2);
        assert_eq!(Cadence::new(5 * NS_PER_MS, res, false).interval_ticks, 0);
        let hr = NativeResolution::HighRes { resolution_ns: 1 };
        assert_eq!(Cadence::new(8 * NS_PER_MS, hr, false).interval_ticks, 0);
        assert!(Cadence::new(0, hr, false).is_one_shot());
    }

    #[test]
    fn test_start_high_res() {
        let sim = SimPlatform::new(SimConfig::new(1));
        let sub = sub_timer(&sim);
        let cadence = Cadence::new(NS_PER_MS, sim.native_resolution(), false);
        sub.state.set(SubTimerState::Starting);

        sub.start(&sim, &cadence, 1000, 500);
        assert_eq!(sub.state(), SubTimerState::Active);
        assert_eq!(sub.start_ns(), 1500);
        assert_eq!(sub.next_ns(), 1500);
        assert_eq!(sub.tick(), 0);
        assert!(sub.is_armed());

        sub.state.set(SubTimerState::Stopping);
        sub.stop();
        assert_eq!(sub.state(), SubTimerState::Stopped);
        assert!(!sub.is_armed());
    }

    #[test]
    fn test_rearm_high_res_does_not_drift() {
        let sim = SimPlatform::new(SimConfig::new(1));
        let sub = sub_timer(&sim);
        let cadence = Cadence::new(NS_PER_MS, sim.native_resolution(), false);
        sub.state.set(SubTimerState::Starting);
        sub.start(&sim, &cadence, 0, NS_PER_MS);

        for tick in 1..=5 {
            sub.rearm(&sim, &cadence, tick);
        }
        assert_eq!(sub.next_ns(), 6 * NS_PER_MS);
    }

    #[test]
    fn test_rearm_ticks_catches_up_across_wrap() {
        let sim = SimPlatform::new(SimConfig::new(1).with_hz(250).with_initial_ticks(u32::MAX - 2));
        let sub = sub_timer(&sim);
        let cadence = Cadence::new(8 * NS_PER_MS, sim.native_resolution(), true);
        sub.state.set(SubTimerState::Starting);
        sub.start(&sim, &cadence, sim.now_ns(), 0);

        // first fire re-anchors on the current tick
        sub.rearm(&sim, &cadence, 1);
        assert_eq!(sub.next_ticks.load(Ordering::Relaxed), (u32::MAX - 2).wrapping_add(2));

        // fall 5 ticks behind; the next target must land in the future
        sim.advance(20 * NS_PER_MS);
        sub.rearm(&sim, &cadence, 2);
        let at = sub.next_ticks.load(Ordering::Relaxed);
        assert!(!ticks_before(at, sim.native_ticks()));
        assert_eq!(at, (u32::MAX - 2).wrapping_add(6));
    }

    #[test]
    fn test_rearm_ticks_inexact_interval() {
        let sim = SimPlatform::new(SimConfig::new(1).with_hz(250));
        let sub = sub_timer(&sim);
        let cadence = Cadence::new(5 * NS_PER_MS, sim.native_resolution(), false);
        sub.state.set(SubTimerState::Starting);
        sub.start(&sim, &cadence, sim.now_ns(), 0);

        let t0 = sim.now_ns();
        sub.rearm(&sim, &cadence, 1);
        assert_eq!(sub.next_ns(), t0 + 5 * NS_PER_MS);
        // 5ms rounds up to two 4ms ticks
        assert_eq!(
            sub.next_ticks.load(Ordering::Relaxed),
            sim.native_ticks().wrapping_add(2)
        );
    }
}
