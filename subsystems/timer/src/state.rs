//! # Sub-Timer State Machine
//!
//! ```text
//!                 Start                      arm
//!   ┌─────────┐ ───────► ┌────────────┐ ─────────────┐
//!   │         │          │  Starting  │              ▼
//!   │         │ ───────► ├────────────┤         ┌─────────┐
//!   │ Stopped │  online  │ MpStarting │ ──────► │ Active  │
//!   │         │          └────────────┘   arm   └─────────┘
//!   │         │ ◄──────────────────────────────── │  │  │
//!   │         │        one-shot fired /           │  │  │
//!   │         │        abandoned fire             │  │  │
//!   │         │          ┌────────────┐   Stop    │  │  │
//!   │         │ ◄─────── │  Stopping  │ ◄─────────┘  │  │
//!   │         │  cancel  ├────────────┤   offline    │  │
//!   │         │ ◄─────── │ MpStopping │ ◄────────────┘  │
//!   └─────────┘  cancel  └────────────┘                 │
//! ```
//!
//! Whoever wins the compare-and-swap out of `Stopped` or `Active` owns the
//! following arm or cancel. The `Mp*` states belong to the hotplug path,
//! the plain ones to Start/Stop, so the two never own the same transition.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// State of one sub-timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SubTimerState {
    /// Idle, native timer disarmed
    Stopped    = 0,
    /// Being armed by Start
    Starting   = 1,
    /// Being armed by a CPU-online event
    MpStarting = 2,
    /// Native timer armed
    Active     = 3,
    /// Being cancelled by Stop
    Stopping   = 4,
    /// Being cancelled by a CPU-offline event
    MpStopping = 5,
}

impl SubTimerState {
    /// Stable states can be claimed with a compare-and-swap
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Stopped | Self::Active)
    }

    /// Check a transition against the state machine
    pub const fn can_transition_to(self, to: SubTimerState) -> bool {
        use SubTimerState::*;
        matches!(
            (self, to),
            (Stopped, Starting | MpStarting)
                | (Starting | MpStarting, Active | Stopped)
                | (Active, Stopping | MpStopping | Stopped)
                | (Stopping | MpStopping, Stopped)
        )
    }
}

impl From<u32> for SubTimerState {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::MpStarting,
            3 => Self::Active,
            4 => Self::Stopping,
            5 => Self::MpStopping,
            // The cell only ever stores discriminants.
            other => unreachable!("invalid sub-timer state {}", other),
        }
    }
}

impl fmt::Display for SubTimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Atomically updated [`SubTimerState`]
pub struct AtomicState(AtomicU32);

impl AtomicState {
    /// New cell in `Stopped`
    pub const fn new() -> Self {
        Self(AtomicU32::new(SubTimerState::Stopped as u32))
    }

    /// Current state
    #[inline]
    pub fn get(&self) -> SubTimerState {
        SubTimerState::from(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally move to `to`
    ///
    /// Only the owner of the current transition may call this.
    #[inline]
    pub fn set(&self, to: SubTimerState) {
        let from = SubTimerState::from(self.0.swap(to as u32, Ordering::AcqRel));
        debug_assert!(
            from.can_transition_to(to),
            "illegal sub-timer transition {} -> {}",
            from,
            to
        );
    }

    /// Move from `from` to `to` if nobody else moved first
    ///
    /// On failure returns the state that won.
    #[inline]
    pub fn try_transition(&self, from: SubTimerState, to: SubTimerState) -> Result<(), SubTimerState> {
        debug_assert!(from.can_transition_to(to));
        self.0
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SubTimerState::from)
    }
}

impl fmt::Debug for AtomicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicState").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubTimerState::*;

    #[test]
    fn test_roundtrip_repr() {
        for state in [Stopped, Starting, MpStarting, Active, Stopping, MpStopping] {
            assert_eq!(SubTimerState::from(state as u32), state);
        }
    }

    #[test]
    fn test_legal_transitions() {
        assert!(Stopped.can_transition_to(Starting));
        assert!(Stopped.can_transition_to(MpStarting));
        assert!(Starting.can_transition_to(Active));
        assert!(MpStarting.can_transition_to(Stopped));
        assert!(Active.can_transition_to(Stopped));
        assert!(Active.can_transition_to(MpStopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Stopped.can_transition_to(Active));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Active.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Active));
        assert!(!MpStopping.can_transition_to(Starting));
        for state in [Stopped, Starting, MpStarting, Active, Stopping, MpStopping] {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    #[should_panic(expected = "invalid sub-timer state 6")]
    fn test_unknown_repr_panics() {
        let _ = SubTimerState::from(6);
    }

    #[test]
    fn test_cas_loser_sees_winner() {
        let state = AtomicState::new();
        state.set(Starting);
        state.set(Active);

        assert_eq!(state.try_transition(Active, MpStopping), Ok(()));
        assert_eq!(state.try_transition(Active, Stopping), Err(MpStopping));
        state.set(Stopped);
        assert_eq!(state.get(), Stopped);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal sub-timer transition")]
    fn test_illegal_set_asserts() {
        let state = AtomicState::new();
        state.set(Active);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal sub-timer transition")]
    fn test_stopped_to_stopped_asserts() {
        let state = AtomicState::new();
        state.set(Stopped);
    }
}
