//! # Spinlocks
//!
//! Interrupt-context safe mutual exclusion for short critical sections.
//! A lock carries a liveness flag so that late callers (for example a hotplug
//! listener racing a teardown) can tell a destroyed lock from a live one.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::HalResult;

/// Host spinlock
pub struct SpinLock {
    inner: spin::Mutex<()>,
    live: AtomicBool,
}

/// Held spinlock; released on drop
pub struct SpinLockGuard<'a> {
    _guard: spin::MutexGuard<'a, ()>,
}

impl SpinLock {
    /// Create a live, unlocked spinlock
    pub const fn new() -> Self {
        Self {
            inner: spin::Mutex::new(()),
            live: AtomicBool::new(true),
        }
    }

    /// Acquire the lock, spinning until it is available
    #[inline]
    pub fn acquire(&self) -> SpinLockGuard<'_> {
        SpinLockGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Check whether the lock has not been destroyed yet
    #[inline]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Mark the lock destroyed
    ///
    /// Holders are not affected; callers are expected to check
    /// [`SpinLock::is_live`] before acquiring.
    pub fn destroy(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.inner.is_locked())
            .field("live", &self.is_live())
            .finish()
    }
}

impl fmt::Debug for SpinLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpinLockGuard")
    }
}

/// Host facility creating spinlocks
pub trait SpinLockProvider: Send + Sync {
    /// Create a spinlock
    fn create_spinlock(&self) -> HalResult<SpinLock> {
        Ok(SpinLock::new())
    }
}
