//! # Affinity Flags
//!
//! ```text
//!  31                        9   8   7                 0
//! ┌───────────────────────────┬───┬───────────────────┐
//! │         reserved (0)      │ S │      CPU id       │
//! └───────────────────────────┴───┴───────────────────┘
//!
//!   S = 0, CPU = 0      any CPU
//!   S = 1, CPU = n      specific CPU n
//!   S = 1, CPU = 0xff   every online CPU (omni)
//! ```
//!
//! The CPU field is only meaningful with the specific bit set; any other
//! combination is rejected by [`AffinityFlags::is_valid`].

use bitflags::bitflags;
use r0rt_hal::CpuId;

bitflags! {
    /// Where a timer fires
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AffinityFlags: u32 {
        /// CPU id field
        const CPU_MASK = 0xff;
        /// Fire on the CPU in [`AffinityFlags::CPU_MASK`]
        const CPU_SPECIFIC = 1 << 8;
        /// Fire on every online CPU
        const CPU_ALL = Self::CPU_SPECIFIC.bits() | Self::CPU_MASK.bits();
    }
}

static_assertions::const_assert_eq!(AffinityFlags::CPU_ALL.bits(), 0x1ff);

impl AffinityFlags {
    /// Fire on whatever CPU the host picks
    pub const ANY: Self = Self::empty();

    /// Pin to `cpu`
    ///
    /// Only the low 8 bits of `cpu` are kept; `0xff` selects every CPU.
    pub const fn cpu(cpu: CpuId) -> Self {
        Self::from_bits_retain(Self::CPU_SPECIFIC.bits() | (cpu & Self::CPU_MASK.bits()))
    }

    /// Replicate on every online CPU
    pub const fn omni() -> Self {
        Self::CPU_ALL
    }

    /// Check for unrecognized bits
    pub const fn is_valid(&self) -> bool {
        let allowed = if self.bits() & Self::CPU_SPECIFIC.bits() != 0 {
            Self::CPU_ALL.bits()
        } else {
            Self::CPU_SPECIFIC.bits()
        };
        self.bits() & !allowed == 0
    }

    /// Decode, or `None` for invalid flags
    pub const fn affinity(&self) -> Option<Affinity> {
        if !self.is_valid() {
            return None;
        }
        if self.bits() & Self::CPU_SPECIFIC.bits() == 0 {
            return Some(Affinity::AnyCpu);
        }
        let cpu = self.bits() & Self::CPU_MASK.bits();
        if cpu == Self::CPU_MASK.bits() {
            Some(Affinity::AllCpus)
        } else {
            Some(Affinity::SpecificCpu(cpu))
        }
    }
}

/// Decoded placement of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// One sub-timer, host-chosen CPU, may migrate
    AnyCpu,
    /// One sub-timer pinned to the CPU
    SpecificCpu(CpuId),
    /// One sub-timer per possible CPU, indexed by CPU id
    AllCpus,
}

impl Affinity {
    /// Whether native timers are armed pinned to their CPU
    pub const fn is_pinned(&self) -> bool {
        !matches!(self, Affinity::AnyCpu)
    }

    /// Whether this is an omni timer
    pub const fn is_omni(&self) -> bool {
        matches!(self, Affinity::AllCpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings() {
        assert_eq!(AffinityFlags::ANY.bits(), 0);
        assert_eq!(AffinityFlags::cpu(3).bits(), 0x103);
        assert_eq!(AffinityFlags::omni().bits(), 0x1ff);
        assert_eq!(AffinityFlags::cpu(0xff), AffinityFlags::omni());
    }

    #[test]
    fn test_validity() {
        assert!(AffinityFlags::ANY.is_valid());
        assert!(AffinityFlags::cpu(7).is_valid());
        assert!(AffinityFlags::omni().is_valid());
        // CPU field without the specific bit
        assert!(!AffinityFlags::from_bits_retain(0x03).is_valid());
        assert!(!AffinityFlags::from_bits_retain(0x200).is_valid());
        assert!(!AffinityFlags::from_bits_retain(0x8000_0101).is_valid());
    }

    #[test]
    fn test_decode() {
        assert_eq!(AffinityFlags::ANY.affinity(), Some(Affinity::AnyCpu));
        assert_eq!(AffinityFlags::cpu(2).affinity(), Some(Affinity::SpecificCpu(2)));
        assert_eq!(AffinityFlags::omni().affinity(), Some(Affinity::AllCpus));
        assert_eq!(AffinityFlags::from_bits_retain(0x400).affinity(), None);
    }

    #[test]
    fn test_pinning() {
        assert!(!Affinity::AnyCpu.is_pinned());
        assert!(Affinity::SpecificCpu(0).is_pinned());
        assert!(Affinity::AllCpus.is_pinned());
        assert!(Affinity::AllCpus.is_omni());
    }
}
