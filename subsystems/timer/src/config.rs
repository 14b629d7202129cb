//! Timer subsystem tunables.

use crate::error::{TimerError, TimerResult};

/// Runtime configuration of the timer subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Spins spent waiting for a sub-timer in a transient state to settle
    /// before the caller gives up on it
    pub cas_retry_limit: u32,
    /// Attempts at reading two identical online-CPU snapshots during omni
    /// start
    pub online_snapshot_retries: u32,
}

impl TimerConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            cas_retry_limit: 1 << 16,
            online_snapshot_retries: 16,
        }
    }

    /// Set the transient state spin budget
    pub const fn with_cas_retry_limit(mut self, limit: u32) -> Self {
        self.cas_retry_limit = limit;
        self
    }

    /// Set the online snapshot attempts
    pub const fn with_online_snapshot_retries(mut self, retries: u32) -> Self {
        self.online_snapshot_retries = retries;
        self
    }

    /// Reject zero budgets
    pub fn validate(&self) -> TimerResult<()> {
        if self.cas_retry_limit == 0 || self.online_snapshot_retries == 0 {
            return Err(TimerError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TimerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let cfg = TimerConfig::new().with_cas_retry_limit(0);
        assert_eq!(cfg.validate(), Err(TimerError::InvalidArgument));
        let cfg = TimerConfig::new().with_online_snapshot_retries(0);
        assert_eq!(cfg.validate(), Err(TimerError::InvalidArgument));
    }
}
