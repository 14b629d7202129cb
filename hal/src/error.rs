//! # HAL Errors
//!
//! Failures reported by host collaborators. Subsystems translate these into
//! their own error types at the API boundary.

use core::fmt;

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// HAL error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HalError {
    /// The CPU id is beyond the highest possible CPU id
    CpuNotFound     = 1,
    /// The CPU exists but is not online
    CpuOffline      = 2,
    /// Allocation of a host object failed
    NoMemory        = 3,
    /// The host cannot provide the requested facility
    NotSupported    = 4,
    /// Release without a matching request
    WrongOrder      = 5,
    /// The listener id is not registered
    NotRegistered   = 6,
    /// Malformed argument
    InvalidArgument = 7,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::CpuNotFound => write!(f, "CPU not found"),
            HalError::CpuOffline => write!(f, "CPU offline"),
            HalError::NoMemory => write!(f, "Out of memory"),
            HalError::NotSupported => write!(f, "Not supported by host"),
            HalError::WrongOrder => write!(f, "Release without matching request"),
            HalError::NotRegistered => write!(f, "Listener not registered"),
            HalError::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}
