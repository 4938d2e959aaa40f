//! Platform abstraction for the probe engine.
//!
//! Probes only ever see `&dyn Platform`, so the Windows backend and the test
//! fake are interchangeable.

use crate::probe::fault::FaultTrap;
use crate::probe::memory::MemorySource;
use crate::probe::nt::NtApi;

/// Everything a probe may touch.
pub trait Platform: MemorySource + NtApi + FaultTrap {}

impl<T: MemorySource + NtApi + FaultTrap> Platform for T {}

/// Coarse, ordered OS generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsTier {
    PreXp,
    Xp,
    Vista,
    Ten,
}

impl OsTier {
    pub fn from_version(major: u32, minor: u32) -> OsTier {
        match (major, minor) {
            (0..=4, _) | (5, 0) => OsTier::PreXp,
            (5, _) => OsTier::Xp,
            (6, _) => OsTier::Vista,
            _ => OsTier::Ten,
        }
    }

    pub fn is_supported(self) -> bool {
        self >= OsTier::Xp
    }
}

/// Immutable facts about the process under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTarget {
    pub runs_under_emulation: bool,
    pub tier: OsTier,
}
