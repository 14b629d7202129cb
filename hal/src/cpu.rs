//! # CPU Identifiers and Sets
//!
//! Logical CPU ids are dense small integers. On every supported host the id
//! doubles as the index into [`CpuSet`], which lets per-CPU arrays be indexed
//! by CPU id directly.

use core::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Logical CPU id
pub type CpuId = u32;

/// Maximum number of CPUs a set can describe
pub const MAX_CPUS: usize = 256;

const WORDS: usize = MAX_CPUS / 64;

static_assertions::const_assert_eq!(MAX_CPUS % 64, 0);
static_assertions::const_assert!(MAX_CPUS <= u8::MAX as usize + 1);

// =============================================================================
// CPU Set
// =============================================================================

/// Fixed-size bitmap of CPU ids
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuSet {
    words: [u64; WORDS],
}

impl CpuSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Set containing CPUs `0..count`
    pub fn first_n(count: usize) -> Self {
        let mut set = Self::empty();
        for cpu in 0..count.min(MAX_CPUS) {
            set.add(cpu as CpuId);
        }
        set
    }

    /// Add a CPU; returns true if it was not a member yet
    ///
    /// Out-of-range ids are ignored and return false.
    pub fn add(&mut self, cpu: CpuId) -> bool {
        match Self::slot(cpu) {
            Some((word, bit)) => {
                let added = self.words[word] & bit == 0;
                self.words[word] |= bit;
                added
            },
            None => false,
        }
    }

    /// Remove a CPU; returns true if it was a member
    pub fn remove(&mut self, cpu: CpuId) -> bool {
        match Self::slot(cpu) {
            Some((word, bit)) => {
                let removed = self.words[word] & bit != 0;
                self.words[word] &= !bit;
                removed
            },
            None => false,
        }
    }

    /// Check membership
    #[inline]
    pub fn contains(&self, cpu: CpuId) -> bool {
        Self::slot(cpu).is_some_and(|(word, bit)| self.words[word] & bit != 0)
    }

    /// Number of CPUs in the set
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Lowest CPU id in the set
    pub fn first(&self) -> Option<CpuId> {
        self.iter().next()
    }

    /// Iterate member CPU ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        (0..MAX_CPUS as CpuId).filter(move |cpu| self.contains(*cpu))
    }

    fn slot(cpu: CpuId) -> Option<(usize, u64)> {
        let idx = cpu as usize;
        if idx >= MAX_CPUS {
            return None;
        }
        Some((idx / 64, 1u64 << (idx % 64)))
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut set = Self::empty();
        for cpu in iter {
            set.add(cpu);
        }
        set
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
