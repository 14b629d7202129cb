//! # Timer Errors
//!
//! Every failure is detected synchronously at the API boundary. State races
//! between Start/Stop, the fire path and hotplug events are resolved
//! internally and never surface here.
//!
//! | Category  | Errors                                   | Retry after        |
//! |-----------|------------------------------------------|--------------------|
//! | Handle    | `InvalidHandle`                          | never              |
//! | Argument  | `InvalidArgument`, `NotSupported`        | never              |
//! | CPU       | `CpuNotFound`, `CpuOffline`              | CPU comes online   |
//! | State     | `TimerActive`, `TimerSuspended`          | Stop / Start       |
//! | Resource  | `NoMemory`                               | memory pressure    |
//! | Ordering  | `WrongOrder`                             | never              |

use core::fmt;

use r0rt_hal::HalError;

/// Result type for timer operations
pub type TimerResult<T> = Result<T, TimerError>;

/// Timer error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TimerError {
    /// Null, destroyed or otherwise invalid timer handle
    InvalidHandle   = 1,
    /// Unrecognized affinity bits or malformed argument
    InvalidArgument = 2,
    /// The CPU id is beyond the highest possible CPU
    CpuNotFound     = 3,
    /// The CPU exists but is offline
    CpuOffline      = 4,
    /// Start on a timer that is already running
    TimerActive     = 5,
    /// Stop on a timer that is not running
    TimerSuspended  = 6,
    /// Combination or facility not supported
    NotSupported    = 7,
    /// Allocation of the timer or one of its host objects failed
    NoMemory        = 8,
    /// Granularity release without a matching request
    WrongOrder      = 9,
}

impl TimerError {
    /// Coarse error category
    pub const fn category(&self) -> &'static str {
        match self {
            TimerError::InvalidHandle => "Handle",
            TimerError::InvalidArgument | TimerError::NotSupported => "Argument",
            TimerError::CpuNotFound | TimerError::CpuOffline => "Cpu",
            TimerError::TimerActive | TimerError::TimerSuspended => "State",
            TimerError::NoMemory => "Resource",
            TimerError::WrongOrder => "Ordering",
        }
    }

    /// Check whether the same call may succeed later without changing it
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            TimerError::CpuOffline
                | TimerError::TimerActive
                | TimerError::TimerSuspended
                | TimerError::NoMemory
        )
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TimerError::InvalidHandle => "invalid timer handle",
            TimerError::InvalidArgument => "invalid argument",
            TimerError::CpuNotFound => "CPU not found",
            TimerError::CpuOffline => "CPU offline",
            TimerError::TimerActive => "timer already active",
            TimerError::TimerSuspended => "timer already suspended",
            TimerError::NotSupported => "not supported",
            TimerError::NoMemory => "out of memory",
            TimerError::WrongOrder => "release without matching request",
        };
        write!(f, "[{}] {}", self.category(), msg)
    }
}

impl From<HalError> for TimerError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::CpuNotFound => TimerError::CpuNotFound,
            HalError::CpuOffline => TimerError::CpuOffline,
            HalError::NoMemory => TimerError::NoMemory,
            HalError::NotSupported => TimerError::NotSupported,
            HalError::WrongOrder => TimerError::WrongOrder,
            HalError::NotRegistered => TimerError::InvalidHandle,
            HalError::InvalidArgument => TimerError::InvalidArgument,
        }
    }
}
