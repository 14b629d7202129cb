//! # Clock Source
//!
//! Monotonic nanosecond time and the host's timer granularity.

/// Nanoseconds per second
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds per millisecond
pub const NS_PER_MS: u64 = 1_000_000;

/// Nanoseconds per microsecond
pub const NS_PER_US: u64 = 1_000;

/// Monotonic time source
pub trait ClockSource: Send + Sync {
    /// Current monotonic time in nanoseconds
    fn now_ns(&self) -> u64;

    /// Length of one scheduling tick of the host timer facility, in nanoseconds
    fn system_granularity_ns(&self) -> u32;
}
