//! # CPU Hotplug Integration
//!
//! Omni timers register a listener for their whole lifetime. A CPU coming
//! online gets its sub-timer started right away with a zero delay; a CPU
//! going offline gets its sub-timer cancelled before the host can migrate
//! it to a surviving CPU.
//!
//! | Event   | Transition             | Arm / cancel                          |
//! |---------|------------------------|---------------------------------------|
//! | Online  | Stopped ─► MpStarting  | here, or via a cross-call to the CPU  |
//! | Offline | Active ─► MpStopping   | synchronous cancel outside the lock   |
//!
//! Events are ignored while the timer is suspended or being destroyed.

use alloc::sync::Weak;
use core::fmt;
use core::sync::atomic::Ordering;

use r0rt_hal::{CpuId, MpEvent, MpListener, SpinLock};

use crate::state::SubTimerState;
use crate::timer::Timer;

/// Hotplug listener bound to one omni timer
pub(crate) struct MpLink<U: Send + Sync + 'static> {
    timer: Weak<Timer<U>>,
}

impl<U: Send + Sync + 'static> MpLink<U> {
    pub(crate) fn new(timer: Weak<Timer<U>>) -> Self {
        Self { timer }
    }
}

impl<U: Send + Sync + 'static> MpListener for MpLink<U> {
    fn on_mp_event(&self, event: MpEvent, cpu: CpuId) {
        if let Some(timer) = self.timer.upgrade() {
            timer.on_mp_event(event, cpu);
        }
    }
}

impl<U: Send + Sync + 'static> fmt::Debug for MpLink<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpLink")
            .field("alive", &(self.timer.strong_count() > 0))
            .finish()
    }
}

impl<U: Send + Sync + 'static> Timer<U> {
    /// Spinlock of a live omni timer
    fn live_lock(&self) -> Option<&SpinLock> {
        if !self.is_valid() {
            return None;
        }
        self.lock.as_ref().filter(|lock| lock.is_live())
    }

    pub(crate) fn on_mp_event(&self, event: MpEvent, cpu: CpuId) {
        let Some(sub) = self.sub_timers.get(cpu as usize) else {
            return;
        };
        let Some(lock) = self.live_lock() else {
            return;
        };

        let guard = lock.acquire();
        if self.suspended.load(Ordering::Acquire) || !self.is_valid() {
            return;
        }
        log::trace!("timer: cpu {} {}", cpu, event);

        match event {
            MpEvent::Online => {
                if sub
                    .state
                    .try_transition(SubTimerState::Stopped, SubTimerState::MpStarting)
                    .is_err()
                {
                    return;
                }

                let now = self.platform.now_ns();
                if self.platform.current_cpu() == cpu {
                    sub.start(&*self.platform, &self.cadence, now, 0);
                    return;
                }

                // Re-checked on the target CPU under the lock.
                sub.state.set(SubTimerState::Stopped);
                drop(guard);

                let arm = |target: CpuId| self.start_on_online_cpu(target, now);
                if let Err(err) = self.platform.run_on_cpu(cpu, &arm) {
                    log::warn!("timer: start on new cpu {} failed: {}", cpu, err);
                }
            },
            MpEvent::Offline => {
                if sub
                    .state
                    .try_transition(SubTimerState::Active, SubTimerState::MpStopping)
                    .is_ok()
                {
                    drop(guard);
                    sub.stop();
                }
            },
        }
    }

    fn start_on_online_cpu(&self, cpu: CpuId, now: u64) {
        let Some(sub) = self.sub_timers.get(cpu as usize) else {
            return;
        };
        let Some(lock) = self.live_lock() else {
            return;
        };

        let _guard = lock.acquire();
        if self.suspended.load(Ordering::Acquire) || !self.is_valid() {
            return;
        }
        if sub
            .state
            .try_transition(SubTimerState::Stopped, SubTimerState::MpStarting)
            .is_ok()
        {
            sub.start(&*self.platform, &self.cadence, now, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::flags::AffinityFlags;
    use crate::state::SubTimerState;
    use crate::testing::{record, setup, Recorder};
    use r0rt_hal::sim::{self, SimConfig};
    use r0rt_hal::{MpEvent, NS_PER_MS};

    #[test]
    fn test_cpu_online_starts_sub_timer() {
        let (sim, mgr) = setup(SimConfig::new(4).with_offline(2));
        let rec = Recorder::new();
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, rec.clone())
            .unwrap();
        handle.start(NS_PER_MS).unwrap();
        sim.advance(3 * NS_PER_MS);

        sim.set_cpu_online(2).unwrap();
        assert_eq!(handle.sub_timer_state(2), Some(SubTimerState::Active));

        // zero delay: fires right away, with its own tick count
        sim.run_due();
        sim.advance(NS_PER_MS);
        assert_eq!(rec.ticks_on(2), vec![1, 2]);
        assert_eq!(rec.ticks_on(0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_cpu_offline_stops_only_its_sub_timer() {
        let (sim, mgr) = setup(SimConfig::new(4).with_offline(2));
        let rec = Recorder::new();
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, rec.clone())
            .unwrap();
        handle.start(NS_PER_MS).unwrap();

        sim.set_cpu_offline(1).unwrap();
        assert_eq!(handle.sub_timer_state(1), Some(SubTimerState::Stopped));
        assert_eq!(handle.sub_timer_state(0), Some(SubTimerState::Active));
        assert_eq!(handle.sub_timer_state(3), Some(SubTimerState::Active));
        assert!(!handle.sub_timer(1).unwrap().is_armed());

        sim.advance(2 * NS_PER_MS);
        assert!(rec.ticks_on(1).is_empty());
        assert_eq!(rec.ticks_on(0), vec![1, 2]);
        assert_eq!(rec.ticks_on(3), vec![1, 2]);
    }

    #[test]
    fn test_online_event_on_target_cpu_starts_inline() {
        let (_sim, mgr) = setup(SimConfig::new(2).with_offline(1));
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, Recorder::new())
            .unwrap();
        handle.start(NS_PER_MS).unwrap();

        // Deliver the event as if the notifier already ran on CPU 1.
        sim::with_cpu(1, || handle.on_mp_event(MpEvent::Online, 1));
        assert_eq!(handle.sub_timer_state(1), Some(SubTimerState::Active));
        let sub = handle.sub_timer(1).unwrap();
        assert_eq!(sub.next_ns(), sub.start_ns());
        assert_eq!(sub.tick(), 0);
    }

    #[test]
    fn test_events_ignored_while_suspended() {
        let (sim, mgr) = setup(SimConfig::new(4).with_offline(2));
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, Recorder::new())
            .unwrap();

        sim.set_cpu_online(2).unwrap();
        assert_eq!(handle.sub_timer_state(2), Some(SubTimerState::Stopped));

        handle.start(0).unwrap();
        handle.stop().unwrap();
        sim.set_cpu_offline(3).unwrap();
        sim.set_cpu_online(3).unwrap();
        assert_eq!(handle.sub_timer_state(3), Some(SubTimerState::Stopped));
        assert_eq!(sim.armed_timer_count(), 0);
    }

    #[test]
    fn test_restarted_cpu_ticks_from_one() {
        let (sim, mgr) = setup(SimConfig::new(2));
        let rec = Recorder::new();
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, rec.clone())
            .unwrap();
        handle.start(NS_PER_MS).unwrap();
        sim.advance(3 * NS_PER_MS);
        assert_eq!(rec.ticks_on(1), vec![1, 2, 3]);

        sim.set_cpu_offline(1).unwrap();
        sim.set_cpu_online(1).unwrap();
        rec.clear();
        sim.run_due();
        assert_eq!(rec.ticks_on(1), vec![1]);
    }

    #[test]
    fn test_late_event_after_teardown_is_ignored() {
        let (sim, mgr) = setup(SimConfig::new(4).with_offline(2));
        let rec = Recorder::new();
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, rec.clone())
            .unwrap();
        handle.start(NS_PER_MS).unwrap();
        handle.teardown().unwrap();
        assert!(!handle.is_valid());

        // Delivered after the listener was already picked for notification.
        handle.on_mp_event(MpEvent::Online, 2);
        sim::with_cpu(2, || handle.on_mp_event(MpEvent::Online, 2));
        handle.on_mp_event(MpEvent::Offline, 1);

        assert_eq!(handle.sub_timer_state(2), Some(SubTimerState::Stopped));
        assert_eq!(handle.sub_timer_state(1), Some(SubTimerState::Stopped));
        assert_eq!(sim.armed_timer_count(), 0);
        sim.advance(5 * NS_PER_MS);
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn test_no_events_after_destroy() {
        let (sim, mgr) = setup(SimConfig::new(4).with_offline(3));
        let handle = mgr
            .create(NS_PER_MS, AffinityFlags::omni(), record, Recorder::new())
            .unwrap();
        handle.start(0).unwrap();
        handle.destroy().unwrap();

        sim.set_cpu_online(3).unwrap();
        sim.set_cpu_offline(1).unwrap();
        assert_eq!(sim.native_timer_count(), 0);
        assert_eq!(sim.armed_timer_count(), 0);
    }
}
