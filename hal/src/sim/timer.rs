//! Simulated native timers.
//!
//! Each timer is a small state cell shared between the owner (through
//! [`SimTimer`]) and the simulated host, which scans armed timers when the
//! virtual clock advances.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use super::CpuGuard;
use crate::cpu::CpuId;
use crate::native::{Expiry, NativeTimer, NativeTimerHandler};

static ARM_SEQ: AtomicU64 = AtomicU64::new(1);

/// An armed expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Armed {
    pub expiry: Expiry,
    pub cpu: CpuId,
    pub pinned: bool,
    pub seq: u64,
}

#[derive(Debug, Default)]
struct CoreState {
    armed: Option<Armed>,
    running_on: Option<ThreadId>,
}

/// Timer state shared with the simulated host
pub(crate) struct SimTimerCore {
    handler: Arc<dyn NativeTimerHandler>,
    state: spin::Mutex<CoreState>,
}

impl SimTimerCore {
    pub(crate) fn new(handler: Arc<dyn NativeTimerHandler>) -> Self {
        Self {
            handler,
            state: spin::Mutex::new(CoreState::default()),
        }
    }

    pub(crate) fn armed(&self) -> Option<Armed> {
        self.state.lock().armed
    }

    /// Move an armed timer queued on `from` to `to`
    pub(crate) fn migrate(&self, from: CpuId, to: CpuId) -> bool {
        let mut state = self.state.lock();
        match state.armed.as_mut() {
            Some(armed) if armed.cpu == from => {
                armed.cpu = to;
                true
            },
            _ => false,
        }
    }

    /// Fire the expiry identified by `seq`, if it is still armed
    ///
    /// The timer is detached before the handler runs, like a host softirq
    /// would do.
    pub(crate) fn fire(&self, seq: u64) -> bool {
        let cpu = {
            let mut state = self.state.lock();
            match state.armed {
                Some(armed) if armed.seq == seq => {
                    state.armed = None;
                    state.running_on = Some(thread::current().id());
                    armed.cpu
                },
                _ => return false,
            }
        };

        let _running = RunningGuard { core: self };
        let _cpu = CpuGuard::enter(cpu);
        self.handler.on_expiry();
        true
    }

    fn arm(&self, expiry: Expiry, cpu: CpuId, pinned: bool) {
        let seq = ARM_SEQ.fetch_add(1, Ordering::Relaxed);
        self.state.lock().armed = Some(Armed {
            expiry,
            cpu,
            pinned,
            seq,
        });
    }

    fn cancel_sync(&self) {
        let me = thread::current().id();
        loop {
            let running_elsewhere = {
                let mut state = self.state.lock();
                state.armed = None;
                matches!(state.running_on, Some(id) if id != me)
            };
            if !running_elsewhere {
                break;
            }
            thread::yield_now();
        }
    }
}

struct RunningGuard<'a> {
    core: &'a SimTimerCore,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.core.state.lock().running_on = None;
    }
}

/// Native timer handed out by [`super::SimPlatform`]
pub struct SimTimer {
    core: Arc<SimTimerCore>,
}

impl SimTimer {
    pub(crate) fn new(core: Arc<SimTimerCore>) -> Self {
        Self { core }
    }
}

impl NativeTimer for SimTimer {
    fn arm(&self, expiry: Expiry, pinned: bool) {
        self.core.arm(expiry, super::current_cpu(), pinned);
    }

    fn cancel_sync(&self) {
        self.core.cancel_sync();
    }

    fn is_pending(&self) -> bool {
        self.core.armed().is_some()
    }
}

impl core::fmt::Debug for SimTimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimTimer")
            .field("armed", &self.core.armed())
            .finish()
    }
}
