//! # Callback Dispatch
//!
//! Every native timer expiry lands in [`Timer::dispatch`], in timer-fire
//! context on the CPU the native timer was queued on:
//!
//! ```text
//!   expiry ─► suspended, or omni fire on a foreign CPU?
//!               │ yes: Active ─► Stopped, drop the fire
//!               │ no
//!               ▼
//!             one-shot?
//!               │ yes: suspend (single), Active ─► Stopped, callback(1)
//!               │ no
//!               ▼
//!             tick += 1, rearm for previous target + interval, callback(tick)
//! ```
//!
//! The rearm happens before the callback so a slow callback does not delay
//! the next expiry.

use alloc::sync::Weak;
use core::fmt;
use core::sync::atomic::Ordering;

use r0rt_hal::{CpuId, NativeTimerHandler};

use crate::state::SubTimerState;
use crate::timer::Timer;

/// Native timer handler bound to one sub-timer
pub(crate) struct SubTimerLink<U: Send + Sync + 'static> {
    timer: Weak<Timer<U>>,
    index: usize,
}

impl<U: Send + Sync + 'static> SubTimerLink<U> {
    pub(crate) fn new(timer: Weak<Timer<U>>, index: usize) -> Self {
        Self { timer, index }
    }
}

impl<U: Send + Sync + 'static> NativeTimerHandler for SubTimerLink<U> {
    fn on_expiry(&self) {
        if let Some(timer) = self.timer.upgrade() {
            timer.dispatch(self.index);
        }
    }
}

impl<U: Send + Sync + 'static> fmt::Debug for SubTimerLink<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTimerLink").field("index", &self.index).finish()
    }
}

impl<U: Send + Sync + 'static> Timer<U> {
    pub(crate) fn dispatch(&self, index: usize) {
        let Some(sub) = self.sub_timers.get(index) else {
            return;
        };
        if !self.is_valid() {
            log::trace!("timer: fire of sub-timer {} after destroy", index);
            return;
        }

        let migrated =
            self.affinity.is_omni() && index as CpuId != self.platform.current_cpu();
        if self.suspended.load(Ordering::Acquire) || migrated {
            log::trace!(
                "timer: dropping fire of sub-timer {} on cpu {}",
                index,
                self.platform.current_cpu()
            );
            let _ = sub.state.try_transition(SubTimerState::Active, SubTimerState::Stopped);
            return;
        }

        if self.cadence.is_one_shot() {
            if self.sub_timers.len() == 1 {
                self.suspended.store(true, Ordering::Release);
            }
            let _ = sub.state.try_transition(SubTimerState::Active, SubTimerState::Stopped);
            let tick = sub.next_tick();
            (self.callback)(self, &self.user, tick);
            return;
        }

        let tick = sub.next_tick();
        sub.rearm(&*self.platform, &self.cadence, tick);
        (self.callback)(self, &self.user, tick);
    }
}
