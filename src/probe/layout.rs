//! Structure overlays for the process control block (PEB), heap records and
//! process parameters.
//!
//! Offsets are table constants keyed by pointer width. Nothing here is derived
//! from `size_of` on the reading process, so a 32-bit build reads the 64-bit
//! block with the 64-bit table.

use crate::probe::platform::OsTier;

/// Which control block a probe inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchView {
    /// The process's own control block, in its own pointer width.
    Native,
    /// The 64-bit control block a WOW64 process also owns.
    Alternate,
}

impl ArchView {
    pub fn width(self) -> PointerWidth {
        match self {
            ArchView::Native => PointerWidth::HOST,
            ArchView::Alternate => PointerWidth::Wide64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    Narrow32,
    Wide64,
}

impl PointerWidth {
    #[cfg(target_pointer_width = "64")]
    pub const HOST: PointerWidth = PointerWidth::Wide64;
    #[cfg(not(target_pointer_width = "64"))]
    pub const HOST: PointerWidth = PointerWidth::Narrow32;

    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Narrow32 => 4,
            PointerWidth::Wide64 => 8,
        }
    }

    /// Decodes one little-endian pointer of this width from the front of `raw`.
    pub fn read_pointer(self, raw: &[u8]) -> u64 {
        match self {
            PointerWidth::Narrow32 => {
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64
            }
            PointerWidth::Wide64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&raw[..8]);
                u64::from_le_bytes(b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlockLayout {
    pub being_debugged: u64,
    pub process_parameters: u64,
    pub nt_global_flag: u64,
    pub number_of_heaps: u64,
    pub process_heaps: u64,
}

const PEB32: ControlBlockLayout = ControlBlockLayout {
    being_debugged: 0x02,
    process_parameters: 0x10,
    nt_global_flag: 0x68,
    number_of_heaps: 0x88,
    process_heaps: 0x90,
};

const PEB64: ControlBlockLayout = ControlBlockLayout {
    being_debugged: 0x02,
    process_parameters: 0x20,
    nt_global_flag: 0xBC,
    number_of_heaps: 0xE8,
    process_heaps: 0xF0,
};

impl ControlBlockLayout {
    pub fn of(width: PointerWidth) -> &'static ControlBlockLayout {
        match width {
            PointerWidth::Narrow32 => &PEB32,
            PointerWidth::Wide64 => &PEB64,
        }
    }
}

/// `Flags` / `ForceFlags` inside a heap record. The heap header was reshuffled
/// in Vista, so the table is keyed by OS tier as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    pub flags: u64,
    pub force_flags: u64,
}

impl HeapLayout {
    pub fn of(width: PointerWidth, tier: OsTier) -> HeapLayout {
        let modern = tier >= OsTier::Vista;
        match (width, modern) {
            (PointerWidth::Narrow32, false) => HeapLayout { flags: 0x0C, force_flags: 0x10 },
            (PointerWidth::Narrow32, true) => HeapLayout { flags: 0x40, force_flags: 0x44 },
            (PointerWidth::Wide64, false) => HeapLayout { flags: 0x14, force_flags: 0x18 },
            (PointerWidth::Wide64, true) => HeapLayout { flags: 0x70, force_flags: 0x74 },
        }
    }

    /// Bytes that must be fetched from the start of a record to cover both fields.
    pub fn span(&self) -> usize {
        (self.flags.max(self.force_flags) + 4) as usize
    }
}

/// `RTL_USER_PROCESS_PARAMETERS.Flags` sits after two ULONGs in both widths.
pub const PROCESS_PARAMETERS_FLAGS: u64 = 0x08;

/// Set by the loader for normally started processes.
pub const PARAMETERS_NORMALIZED_FLAG: u32 = 0x4000;

pub const FLG_HEAP_ENABLE_TAIL_CHECK: u32 = 0x10;
pub const FLG_HEAP_ENABLE_FREE_CHECK: u32 = 0x20;
pub const FLG_HEAP_VALIDATE_PARAMETERS: u32 = 0x40;

pub const BAD_GLOBAL_FLAGS: u32 =
    FLG_HEAP_ENABLE_TAIL_CHECK | FLG_HEAP_ENABLE_FREE_CHECK | FLG_HEAP_VALIDATE_PARAMETERS;

pub const HEAP_TAIL_CHECKING_ENABLED: u32 = 0x20;
pub const HEAP_FREE_CHECKING_ENABLED: u32 = 0x40;
pub const HEAP_SKIP_VALIDATION_CHECKS: u32 = 0x1000_0000;
pub const HEAP_VALIDATE_PARAMETERS_ENABLED: u32 = 0x4000_0000;

pub const BAD_HEAP_FLAGS: u32 = HEAP_TAIL_CHECKING_ENABLED
    | HEAP_FREE_CHECKING_ENABLED
    | HEAP_SKIP_VALIDATION_CHECKS
    | HEAP_VALIDATE_PARAMETERS_ENABLED;
