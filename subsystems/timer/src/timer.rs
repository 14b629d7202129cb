//! # Timer Objects
//!
//! A [`Timer`] owns a fixed array of sub-timers, allocated once at creation
//! and indexed by CPU id for omni timers. Callers hold it through a
//! [`TimerHandle`], the only type that can start, stop or destroy it.
//!
//! ## Lifecycle
//!
//! ```text
//!   create ──► [suspended] ──start──► [running] ──stop──► [suspended]
//!                   │                     │
//!                   └────── destroy ◄─────┘
//!                              │
//!                              ├─ deregister hotplug listener
//!                              ├─ stop if running
//!                              ├─ flush every native timer
//!                              ├─ invalidate magic
//!                              └─ destroy spinlock
//! ```
//!
//! Native timer handlers and the hotplug listener reach the timer through
//! weak references and re-check the magic, so a late event after destroy is
//! ignored instead of touching a dead timer.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use r0rt_hal::{CpuId, ListenerId, MpListener, Platform, SpinLock};

use crate::config::TimerConfig;
use crate::dispatch::SubTimerLink;
use crate::error::{TimerError, TimerResult};
use crate::flags::{Affinity, AffinityFlags};
use crate::hotplug::MpLink;
use crate::state::SubTimerState;
use crate::subtimer::{Cadence, SubTimer};

/// Validity tag of a live timer
pub(crate) const TIMER_MAGIC: u32 = 0x1976_0826;

/// User callback, invoked in timer-fire context with the fire number
pub type TimerCallback<U> = fn(&Timer<U>, &U, u64);

/// A recurring or one-shot timer
pub struct Timer<U: Send + Sync + 'static> {
    magic: AtomicU32,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) config: TimerConfig,
    pub(crate) lock: Option<SpinLock>,
    pub(crate) suspended: AtomicBool,
    pub(crate) affinity: Affinity,
    pub(crate) cadence: Cadence,
    pub(crate) callback: TimerCallback<U>,
    pub(crate) user: U,
    listener: spin::Mutex<Option<ListenerId>>,
    pub(crate) sub_timers: Box<[SubTimer]>,
}

impl<U: Send + Sync + 'static> Timer<U> {
    pub(crate) fn create(
        platform: Arc<dyn Platform>,
        config: TimerConfig,
        interval_ns: u64,
        flags: AffinityFlags,
        callback: TimerCallback<U>,
        user: U,
    ) -> TimerResult<TimerHandle<U>> {
        let affinity = flags.affinity().ok_or(TimerError::InvalidArgument)?;
        let count = match affinity {
            Affinity::AnyCpu => 1,
            Affinity::SpecificCpu(cpu) => {
                if !platform.is_cpu_online(cpu) {
                    return Err(if cpu > platform.max_cpu_id() {
                        TimerError::CpuNotFound
                    } else {
                        TimerError::CpuOffline
                    });
                }
                1
            },
            Affinity::AllCpus => {
                if interval_ns == 0 {
                    return Err(TimerError::NotSupported);
                }
                platform.max_cpu_id() as usize + 1
            },
        };

        let mut sub_timers = Vec::new();
        sub_timers
            .try_reserve_exact(count)
            .map_err(|_| TimerError::NoMemory)?;

        let lock = if count > 1 {
            Some(platform.create_spinlock()?)
        } else {
            None
        };

        let cadence = Cadence::new(interval_ns, platform.native_resolution(), affinity.is_pinned());
        let timer = Arc::new_cyclic(|weak: &Weak<Timer<U>>| {
            for index in 0..count {
                let link = Arc::new(SubTimerLink::new(weak.clone(), index));
                sub_timers.push(SubTimer::new(platform.create_native_timer(link)));
            }

            Timer {
                magic: AtomicU32::new(TIMER_MAGIC),
                platform: Arc::clone(&platform),
                config,
                lock,
                suspended: AtomicBool::new(true),
                affinity,
                cadence,
                callback,
                user,
                listener: spin::Mutex::new(None),
                sub_timers: sub_timers.into_boxed_slice(),
            }
        });

        if count > 1 {
            let link: Arc<dyn MpListener> = Arc::new(MpLink::new(Arc::downgrade(&timer)));
            match timer.platform.register_listener(link) {
                Ok(id) => *timer.listener.lock() = Some(id),
                Err(err) => {
                    log::warn!("timer: hotplug listener registration failed: {}", err);
                    timer.teardown()?;
                    return Err(err.into());
                },
            }
        }

        log::debug!(
            "timer: created {:?}, interval {}ns, {} sub-timer(s)",
            affinity,
            interval_ns,
            count
        );
        Ok(TimerHandle { timer })
    }

    /// Check the validity tag
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic.load(Ordering::Acquire) == TIMER_MAGIC
    }

    #[inline]
    pub(crate) fn check_valid(&self) -> TimerResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TimerError::InvalidHandle)
        }
    }

    pub(crate) fn teardown(&self) -> TimerResult<()> {
        self.check_valid()?;

        let listener = self.listener.lock().take();
        if let Some(id) = listener {
            if let Err(err) = self.platform.deregister_listener(id) {
                log::warn!("timer: hotplug listener deregistration failed: {}", err);
            }
        }

        if !self.suspended.load(Ordering::Acquire) {
            if let Err(err) = self.stop() {
                log::trace!("timer: stop during destroy: {}", err);
            }
        }

        for sub in self.sub_timers.iter() {
            sub.flush();
        }

        self.magic.store(!TIMER_MAGIC, Ordering::Release);
        if let Some(lock) = &self.lock {
            lock.destroy();
        }

        log::debug!("timer: destroyed {:?}", self.affinity);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Whether the timer is not running
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Placement of the timer
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Interval in nanoseconds, 0 for one-shot
    pub fn interval_ns(&self) -> u64 {
        self.cadence.interval_ns
    }

    /// Number of sub-timers
    pub fn sub_timer_count(&self) -> usize {
        self.sub_timers.len()
    }

    /// Sub-timer of `cpu` (omni timers) or the single sub-timer at index 0
    pub fn sub_timer(&self, index: CpuId) -> Option<&SubTimer> {
        self.sub_timers.get(index as usize)
    }

    /// State of the sub-timer at `index`
    pub fn sub_timer_state(&self, index: CpuId) -> Option<SubTimerState> {
        self.sub_timer(index).map(SubTimer::state)
    }

    /// User argument
    pub fn user(&self) -> &U {
        &self.user
    }
}

impl<U: Send + Sync + 'static> fmt::Debug for Timer<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("valid", &self.is_valid())
            .field("suspended", &self.is_suspended())
            .field("affinity", &self.affinity)
            .field("interval_ns", &self.cadence.interval_ns)
            .field("sub_timers", &self.sub_timers)
            .finish()
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Owning handle of a [`Timer`]
///
/// Dropping the handle destroys the timer.
pub struct TimerHandle<U: Send + Sync + 'static> {
    timer: Arc<Timer<U>>,
}

impl<U: Send + Sync + 'static> TimerHandle<U> {
    /// Start firing `first_ns` from now
    ///
    /// Fails with `TimerActive` if the timer is already running.
    pub fn start(&self, first_ns: u64) -> TimerResult<()> {
        self.timer.start(first_ns)
    }

    /// Stop firing and wait for every native timer to be cancelled
    ///
    /// Fails with `TimerSuspended` if the timer is not running.
    pub fn stop(&self) -> TimerResult<()> {
        self.timer.stop()
    }

    /// Stop the timer and release it
    ///
    /// No callback runs once this returns.
    pub fn destroy(self) -> TimerResult<()> {
        self.timer.teardown()
    }
}

impl<U: Send + Sync + 'static> Deref for TimerHandle<U> {
    type Target = Timer<U>;

    fn deref(&self) -> &Timer<U> {
        &self.timer
    }
}

impl<U: Send + Sync + 'static> Drop for TimerHandle<U> {
    fn drop(&mut self) {
        if self.timer.is_valid() {
            if let Err(err) = self.timer.teardown() {
                log::warn!("timer: destroy on drop failed: {}", err);
            }
        }
    }
}

impl<U: Send + Sync + 'static> fmt::Debug for TimerHandle<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TimerHandle").field(&*self.timer).finish()
    }
}

/// Destroy `handle`, accepting an absent one
pub fn destroy_timer<U: Send + Sync + 'static>(handle: Option<TimerHandle<U>>) -> TimerResult<()> {
    match handle {
        Some(handle) => handle.destroy(),
        None => Ok(()),
    }
}
