//! # r0rt Timer Subsystem
//!
//! CPU-affine recurring and one-shot timers built on the host's native timer
//! facility.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            TimerManager                                 │
//! │        create() / create_started() / system granularity                 │
//! └───────────────────────────────────┬─────────────────────────────────────┘
//!                                     │
//! ┌───────────────────────────────────▼─────────────────────────────────────┐
//! │                         Timer (TimerHandle)                             │
//! │  magic │ suspended │ affinity │ cadence │ callback │ user │ spinlock    │
//! │                                                                         │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐        ┌──────────┐             │
//! │  │ SubTimer │ │ SubTimer │ │ SubTimer │  ...   │ SubTimer │             │
//! │  │  cpu 0   │ │  cpu 1   │ │  cpu 2   │        │  cpu N   │             │
//! │  └────┬─────┘ └────┬─────┘ └────┬─────┘        └────┬─────┘             │
//! └───────┼────────────┼────────────┼───────────────────┼───────────────────┘
//!         │            │            │                   │
//! ┌───────▼────────────▼────────────▼───────────────────▼───────────────────┐
//! │                     Platform (r0rt-hal)                                 │
//! │   native timers │ clock │ cross-calls │ hotplug listener │ spinlocks    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three affinities are supported:
//!
//! - **any CPU**: one sub-timer, queued wherever the host likes
//! - **specific CPU**: one sub-timer, pinned to the requested CPU
//! - **omni**: one sub-timer per possible CPU, each pinned to its CPU and
//!   kept in step with CPU hotplug for the lifetime of the timer
//!
//! ## Example
//!
//! ```ignore
//! use r0rt_timer::{AffinityFlags, Timer, TimerManager};
//!
//! fn heartbeat(_timer: &Timer<()>, _user: &(), tick: u64) {
//!     log::info!("heartbeat {}", tick);
//! }
//!
//! let manager = TimerManager::new(platform);
//! let timer = manager.create(10_000_000, AffinityFlags::omni(), heartbeat, ())?;
//! timer.start(0)?;
//! // ...
//! timer.destroy()?;
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod flags;
pub mod manager;
pub mod state;
pub mod subtimer;
pub mod timer;

mod control;
mod dispatch;
mod hotplug;

#[cfg(test)]
mod testing;

pub use config::TimerConfig;
pub use error::{TimerError, TimerResult};
pub use flags::{Affinity, AffinityFlags};
pub use manager::TimerManager;
pub use state::SubTimerState;
pub use subtimer::SubTimer;
pub use timer::{destroy_timer, Timer, TimerCallback, TimerHandle};
