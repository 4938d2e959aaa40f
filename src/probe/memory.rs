//! Cross-architecture access to the process control block.
//!
//! A WOW64 process owns two PEBs. The native one is read with the ordinary
//! same-width primitive; the 64-bit one lives above the 4 GiB line and can only
//! be reached through the dedicated wide primitive.

use crate::probe::error::ProbeError;
use crate::probe::layout::{ArchView, ControlBlockLayout, HeapLayout, PointerWidth};
use crate::probe::platform::OsTier;

pub trait MemorySource {
    /// Native-width control block address of the target.
    fn native_control_block(&self) -> Result<u64, ProbeError>;

    /// 64-bit control block address. Only meaningful under emulation.
    fn wide_control_block(&self) -> Result<u64, ProbeError>;

    /// Same-width read.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), ProbeError>;

    /// Narrow process reading wide memory.
    fn read_wide(&self, address: u64, buf: &mut [u8]) -> Result<(), ProbeError>;
}

/// Dispatches reads to the right primitive and layout for an `ArchView`.
pub struct CrossArchReader<'a, M: ?Sized> {
    source: &'a M,
    tier: OsTier,
}

impl<'a, M: MemorySource + ?Sized> CrossArchReader<'a, M> {
    pub fn new(source: &'a M, tier: OsTier) -> Self {
        CrossArchReader { source, tier }
    }

    pub fn control_block(&self, view: ArchView) -> Result<u64, ProbeError> {
        match view {
            ArchView::Native => self.source.native_control_block(),
            ArchView::Alternate => self.source.wide_control_block(),
        }
    }

    pub fn layout(&self, view: ArchView) -> &'static ControlBlockLayout {
        ControlBlockLayout::of(view.width())
    }

    pub fn heap_layout(&self, view: ArchView) -> HeapLayout {
        HeapLayout::of(view.width(), self.tier)
    }

    pub fn read_remote(&self, view: ArchView, address: u64, len: usize) -> Result<Vec<u8>, ProbeError> {
        let mut buf = vec![0u8; len];
        self.read_into(view, address, &mut buf)?;
        Ok(buf)
    }

    pub fn read_into(&self, view: ArchView, address: u64, buf: &mut [u8]) -> Result<(), ProbeError> {
        match view {
            ArchView::Native => self.source.read(address, buf),
            ArchView::Alternate => self.source.read_wide(address, buf),
        }
    }

    pub fn read_u8(&self, view: ArchView, address: u64) -> Result<u8, ProbeError> {
        let mut b = [0u8; 1];
        self.read_into(view, address, &mut b)?;
        Ok(b[0])
    }

    pub fn read_u32(&self, view: ArchView, address: u64) -> Result<u32, ProbeError> {
        let mut b = [0u8; 4];
        self.read_into(view, address, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Reads one pointer in the view's width.
    pub fn read_pointer(&self, view: ArchView, address: u64) -> Result<u64, ProbeError> {
        let width = view.width();
        let mut b = [0u8; 8];
        self.read_into(view, address, &mut b[..width.bytes()])?;
        Ok(width.read_pointer(&b))
    }

    /// Reads `count` consecutive pointers in the view's width.
    pub fn read_pointer_array(&self, view: ArchView, address: u64, count: usize) -> Result<Vec<u64>, ProbeError> {
        let width: PointerWidth = view.width();
        if count == 0 {
            return Ok(Vec::new());
        }
        let raw = self.read_remote(view, address, count * width.bytes())?;
        Ok(raw.chunks_exact(width.bytes()).map(|c| width.read_pointer(c)).collect())
    }
}
