//! Addresses, cache levels and the set-index computation.
//!
//! Virtual and Physical Addresses
//! ==============================
//!
//! Set indexes are a function of the *physical* address. However, the low
//! bits of an address are shared between the virtual and physical address
//! spaces:
//!
//! - With 4KiB pages, bits [11:0] are identical
//! - With 2MiB pages, bits [20:0] are identical
//!
//! On a typical part, the L1D set index lives in bits [11:6], so a virtual
//! address is always good enough to compute it. The L2 and LLC set indexes
//! need a few more bits, which are only guaranteed to match when the
//! memory is backed by huge pages. Callers are expected to know which
//! regime they're in; otherwise, resolve a [PhysAddr] first
//! (see [crate::util::pagemap]).

use crate::error::{ Error, Result };
use std::fmt;

/// Implemented on types that carry a raw address.
pub trait Address: Copy {
    fn value(&self) -> usize;
}

/// An address in the virtual address space of the current process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);
impl VirtAddr {
    pub fn from_ptr<T>(ptr: *const T) -> Self { Self(ptr as usize) }
    pub fn as_ptr<T>(&self) -> *const T { self.0 as *const T }
    pub fn as_mut_ptr<T>(&self) -> *mut T { self.0 as *mut T }
    pub const fn add(&self, off: usize) -> Self { Self(self.0 + off) }
}
impl Address for VirtAddr {
    fn value(&self) -> usize { self.0 }
}
impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v:{:016x}", self.0)
    }
}

/// A physical address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub usize);
impl Address for PhysAddr {
    fn value(&self) -> usize { self.0 }
}
impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p:{:016x}", self.0)
    }
}

/// Index of a set within some level of the cache hierarchy.
pub type SetIndex = usize;

/// Identifies an LLC slice.
///
/// There's no documented function from addresses to slices, so this is
/// always a *measured* property (see [crate::locator]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceId(pub usize);
impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A level in the cache hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheLevel {
    L1,
    L2,
    Llc,
}
impl CacheLevel {
    pub const ALL: [CacheLevel; 3] = [Self::L1, Self::L2, Self::Llc];
}
impl TryFrom<u8> for CacheLevel {
    type Error = Error;
    fn try_from(n: u8) -> Result<Self> {
        match n {
            1 => Ok(Self::L1),
            2 => Ok(Self::L2),
            3 => Ok(Self::Llc),
            _ => Err(Error::InvalidCacheLevel(n)),
        }
    }
}
impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::Llc => write!(f, "LLC"),
        }
    }
}

/// Describes the parts of the cache hierarchy we care about.
///
/// Each set-index mask selects the address bits that index a set at that
/// level. Masks are expected to be a contiguous run of bits starting at
/// the cache line offset (see [CacheGeometry::validate]). For the LLC, the
/// mask describes the sets *within a single slice*.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    /// log2 of the cache line size
    pub line_shift: u32,

    /// Set-index mask for the L1 data cache
    pub l1_mask: usize,

    /// Set-index mask for the L2 cache
    pub l2_mask: usize,

    /// Set-index mask for a single LLC slice
    pub llc_mask: usize,

    /// log2 of the page size used by the page tables
    pub page_shift: u32,

    /// Capacity of the L1 instruction cache (in bytes)
    pub l1i_size: usize,

    /// Number of logical cores
    pub num_cores: usize,
}

impl CacheGeometry {
    /// Intel Skylake-SP: 32KiB 8-way L1D, 1MiB 16-way L2,
    /// 1.375MiB 11-way LLC slices.
    pub const fn skylake_sp() -> Self {
        Self {
            line_shift: 6,
            l1_mask:  0x0000_0fc0,
            l2_mask:  0x0000_ffc0,
            llc_mask: 0x0001_ffc0,
            page_shift: 12,
            l1i_size: 32 * 1024,
            num_cores: 8,
        }
    }

    /// Arm Neoverse N1: 64KiB 4-way L1D, 1MiB 8-way L2,
    /// 1MiB 16-way system cache slices.
    pub const fn neoverse_n1() -> Self {
        Self {
            line_shift: 6,
            l1_mask:  0x0000_3fc0,
            l2_mask:  0x0001_ffc0,
            llc_mask: 0x0000_ffc0,
            page_shift: 12,
            l1i_size: 64 * 1024,
            num_cores: 8,
        }
    }
}

impl CacheGeometry {
    pub fn line_shift(mut self, x: u32) -> Self {
        self.line_shift = x;
        self
    }
    pub fn l1_mask(mut self, x: usize) -> Self {
        self.l1_mask = x;
        self
    }
    pub fn l2_mask(mut self, x: usize) -> Self {
        self.l2_mask = x;
        self
    }
    pub fn llc_mask(mut self, x: usize) -> Self {
        self.llc_mask = x;
        self
    }
    pub fn page_shift(mut self, x: u32) -> Self {
        self.page_shift = x;
        self
    }
    pub fn l1i_size(mut self, x: usize) -> Self {
        self.l1i_size = x;
        self
    }
    pub fn num_cores(mut self, x: usize) -> Self {
        self.num_cores = x;
        self
    }
}

impl CacheGeometry {
    pub const fn line_size(&self) -> usize { 1 << self.line_shift }
    pub const fn page_size(&self) -> usize { 1 << self.page_shift }

    /// Return the set-index mask for the given level.
    pub const fn mask(&self, level: CacheLevel) -> usize {
        match level {
            CacheLevel::L1 => self.l1_mask,
            CacheLevel::L2 => self.l2_mask,
            CacheLevel::Llc => self.llc_mask,
        }
    }

    /// Return the number of sets at the given level.
    pub const fn sets(&self, level: CacheLevel) -> usize {
        (self.mask(level) >> self.line_shift) + 1
    }

    /// Compute the set index for `addr` at the given level.
    ///
    /// This is a pure function of the address and the geometry.
    /// See the module documentation for when a [VirtAddr] is acceptable.
    pub fn set_index<A: Address>(&self, addr: A, level: CacheLevel) -> SetIndex {
        (addr.value() & self.mask(level)) >> self.line_shift
    }

    /// Returns true if the set-index bits for `level` are identical between
    /// virtual and physical addresses when using pages of `1 << page_shift`
    /// bytes.
    pub const fn virtually_indexable(&self, level: CacheLevel, page_shift: u32)
        -> bool
    {
        let mask = self.mask(level);
        (usize::BITS - mask.leading_zeros()) <= page_shift
    }

    /// Check that the geometry is self-consistent.
    pub fn validate(&self) -> Result<()> {
        if self.line_shift == 0 || self.line_shift >= self.page_shift {
            return Err(Error::InvalidGeometry("line size must be smaller than a page"));
        }
        if self.num_cores == 0 {
            return Err(Error::InvalidGeometry("core count must be nonzero"));
        }
        if self.l1i_size < self.line_size() {
            return Err(Error::InvalidGeometry("L1I must hold at least one line"));
        }
        for level in CacheLevel::ALL {
            let mask = self.mask(level);
            if mask == 0 || mask.trailing_zeros() != self.line_shift {
                return Err(Error::InvalidGeometry(
                    "set-index masks must start at the line offset"
                ));
            }
            let run = mask >> self.line_shift;
            if (run & (run + 1)) != 0 {
                return Err(Error::InvalidGeometry(
                    "set-index masks must be contiguous"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn synthetic() -> CacheGeometry {
        CacheGeometry::skylake_sp()
            .l1_mask(0xfc0)
            .l2_mask(0xfc0)
            .llc_mask(0xfc0)
    }

    #[test]
    fn llc_scenario() {
        let g = synthetic();
        assert_eq!(g.line_size(), 64);
        assert_eq!(g.sets(CacheLevel::Llc), 64);
        assert_eq!(g.set_index(VirtAddr(0x1000), CacheLevel::Llc), 0);
        assert_eq!(g.set_index(VirtAddr(0x1fc0), CacheLevel::Llc), 63);
        assert_eq!(g.set_index(VirtAddr(0x1fff), CacheLevel::Llc), 63);
    }

    #[test]
    fn index_is_in_range() {
        let g = CacheGeometry::skylake_sp();
        for level in CacheLevel::ALL {
            for addr in (0..0x40_0000usize).step_by(0x1_0040) {
                let set = g.set_index(VirtAddr(addr), level);
                assert!(set < g.sets(level));
                assert_eq!(set, g.set_index(VirtAddr(addr), level));
            }
        }
    }

    #[test]
    fn presets_are_valid() {
        CacheGeometry::skylake_sp().validate().unwrap();
        CacheGeometry::neoverse_n1().validate().unwrap();
        assert_eq!(CacheGeometry::skylake_sp().sets(CacheLevel::L1), 64);
        assert_eq!(CacheGeometry::skylake_sp().sets(CacheLevel::L2), 1024);
        assert_eq!(CacheGeometry::skylake_sp().sets(CacheLevel::Llc), 2048);
    }

    #[test]
    fn bad_masks_are_rejected() {
        let g = CacheGeometry::skylake_sp();
        assert!(g.llc_mask(0xf80).validate().is_err());
        assert!(g.llc_mask(0xdc0).validate().is_err());
        assert!(g.l1_mask(0).validate().is_err());
        assert!(g.num_cores(0).validate().is_err());
    }

    #[test]
    fn level_numbers() {
        assert_eq!(CacheLevel::try_from(1).unwrap(), CacheLevel::L1);
        assert_eq!(CacheLevel::try_from(3).unwrap(), CacheLevel::Llc);
        assert!(matches!(CacheLevel::try_from(4), Err(Error::InvalidCacheLevel(4))));
    }

    #[test]
    fn virtual_indexing() {
        let g = CacheGeometry::skylake_sp();
        assert!(g.virtually_indexable(CacheLevel::L1, 12));
        assert!(!g.virtually_indexable(CacheLevel::Llc, 12));
        assert!(g.virtually_indexable(CacheLevel::Llc, 21));
    }
}
