//! # Timer Manager
//!
//! Entry point of the subsystem: binds a host [`Platform`] to a
//! [`TimerConfig`] and creates timers on it. Also fronts the host's system
//! timer granularity controls.

use alloc::sync::Arc;
use core::fmt;

use r0rt_hal::{Platform, NS_PER_MS};

use crate::config::TimerConfig;
use crate::error::TimerResult;
use crate::flags::AffinityFlags;
use crate::timer::{Timer, TimerCallback, TimerHandle};

/// Creates timers on one host
pub struct TimerManager {
    platform: Arc<dyn Platform>,
    config: TimerConfig,
}

impl TimerManager {
    /// Manager with the default configuration
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            config: TimerConfig::new(),
        }
    }

    /// Manager with a custom configuration
    pub fn with_config(platform: Arc<dyn Platform>, config: TimerConfig) -> TimerResult<Self> {
        config.validate()?;
        Ok(Self { platform, config })
    }

    /// Active configuration
    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Host this manager runs on
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Create a suspended timer
    ///
    /// `interval_ns == 0` makes a one-shot timer, which cannot be combined
    /// with [`AffinityFlags::omni`].
    pub fn create<U: Send + Sync + 'static>(
        &self,
        interval_ns: u64,
        flags: AffinityFlags,
        callback: TimerCallback<U>,
        user: U,
    ) -> TimerResult<TimerHandle<U>> {
        Timer::create(
            Arc::clone(&self.platform),
            self.config,
            interval_ns,
            flags,
            callback,
            user,
        )
    }

    /// Create a recurring any-CPU timer and start it immediately
    pub fn create_started<U: Send + Sync + 'static>(
        &self,
        interval_ms: u32,
        callback: TimerCallback<U>,
        user: U,
    ) -> TimerResult<TimerHandle<U>> {
        let handle = self.create(
            interval_ms as u64 * NS_PER_MS,
            AffinityFlags::ANY,
            callback,
            user,
        )?;
        handle.start(0)?;
        Ok(handle)
    }

    // -------------------------------------------------------------------------
    // Granularity
    // -------------------------------------------------------------------------

    /// Resolution of the host timer facility in nanoseconds
    pub fn system_granularity_ns(&self) -> u32 {
        self.platform.system_granularity_ns()
    }

    /// Ask for a finer system timer granularity
    ///
    /// Returns the granted value, to be handed back to
    /// [`TimerManager::release_system_granularity`].
    pub fn request_system_granularity(&self, request_ns: u32) -> TimerResult<u32> {
        let granted = self.platform.request_granularity(request_ns)?;
        log::debug!("timer: granularity {}ns requested, {}ns granted", request_ns, granted);
        Ok(granted)
    }

    /// Return a granted granularity
    pub fn release_system_granularity(&self, granted_ns: u32) -> TimerResult<()> {
        self.platform.release_granularity(granted_ns)?;
        Ok(())
    }
}

impl fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerManager")
            .field("config", &self.config)
            .field("granularity_ns", &self.system_granularity_ns())
            .finish()
    }
}
