//! Module for interacting with `/proc/self/pagemap`.
//!
//! Translations are never cached: the result is only meaningful while the
//! mapping stays resident, so callers should resolve again after anything
//! that might have remapped the page.

use std::io::prelude::*;
use crate::error::{ Error, Result };
use crate::geometry::{ PhysAddr, VirtAddr };

/// An entry in `/proc/self/pagemap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageMapEntry(pub u64);
impl PageMapEntry {
    pub const NUM_BYTES: usize = 8;
    pub fn present(&self) -> bool { (self.0 & (1 << 63)) != 0 }
    pub fn swapped(&self) -> bool { (self.0 & (1 << 62)) != 0 }
    pub fn exclusive(&self) -> bool { (self.0 & (1 << 56)) != 0 }
    pub fn soft_dirty(&self) -> bool { (self.0 & (1 << 55)) != 0 }
    pub fn pfn(&self) -> usize {
        self.0 as usize & ((1 << 55) - 1)
    }

    /// Compose the physical address for `vaddr` from this entry, where
    /// frames are `1 << page_shift` bytes.
    pub fn to_paddr(&self, vaddr: VirtAddr, page_shift: u32) -> Result<PhysAddr> {
        if !self.present() {
            return Err(Error::PageNotResident {
                vaddr: vaddr.0,
                swapped: self.swapped(),
            });
        }
        if self.pfn() == 0 {
            return Err(Error::FrameHidden { vaddr: vaddr.0 });
        }
        Ok(compose(self.pfn(), vaddr, page_shift))
    }
}

/// `(pfn << page_shift) | (vaddr mod page_size)`
pub const fn compose(pfn: usize, vaddr: VirtAddr, page_shift: u32) -> PhysAddr {
    PhysAddr((pfn << page_shift) | (vaddr.0 & ((1 << page_shift) - 1)))
}

/// Wrapper for interacting with `/proc/self/pagemap`.
#[derive(Clone, Copy, Debug)]
pub struct PageMap {
    /// log2 of the base page size (pagemap has one entry per base page)
    page_shift: u32,
}
impl PageMap {
    const PATH: &'static str = "/proc/self/pagemap";

    /// Use the base page size reported by the system.
    pub fn new() -> Self {
        let page_size = nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .map(|sz| sz as usize)
            .filter(|sz| sz.is_power_of_two())
            .unwrap_or(4096);
        Self::with_page_shift(page_size.trailing_zeros())
    }

    pub const fn with_page_shift(page_shift: u32) -> Self {
        Self { page_shift }
    }

    pub const fn page_shift(&self) -> u32 { self.page_shift }

    /// Read the raw pagemap entry for the page containing `vaddr`.
    pub fn entry(&self, vaddr: VirtAddr) -> Result<PageMapEntry> {
        let mut f = std::fs::File::open(Self::PATH)?;

        // Seek to the appropriate pagemap entry and read it
        let mut buf = [0u8; PageMapEntry::NUM_BYTES];
        let vfn  = vaddr.0 >> self.page_shift;
        let foff = (vfn * PageMapEntry::NUM_BYTES) as u64;
        f.seek(std::io::SeekFrom::Start(foff))?;
        f.read_exact(&mut buf)?;
        Ok(PageMapEntry(u64::from_le_bytes(buf)))
    }

    /// Resolve the given virtual address into a physical address.
    pub fn resolve(&self, vaddr: VirtAddr) -> Result<PhysAddr> {
        let entry = self.entry(vaddr)?;
        if !entry.present() {
            log::debug!("pagemap: {} not present (entry={:016x})", vaddr, entry.0);
        }
        entry.to_paddr(vaddr, self.page_shift)
    }
}

/// Resolve `vaddr` with the system's base page size.
pub fn resolve_physical(vaddr: VirtAddr) -> Result<PhysAddr> {
    PageMap::new().resolve(vaddr)
}
