//! Searching for addresses that share an LLC (slice, set) pair.
//!
//! Candidates are visited one cache line at a time. The set index is
//! cheap to compute, so it's always checked first: the (expensive) slice
//! measurement only runs for candidates that already land in the right
//! set.

use crate::error::{ Error, Result };
use crate::geometry::{ CacheGeometry, CacheLevel, SetIndex, SliceId, VirtAddr };
use crate::locator::{ RaceBackend, SliceLocator };
use crate::util::pagemap::PageMap;

/// Which address is used to compute the LLC set index for a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indexing {
    /// Use the virtual address directly. Only correct when the buffer is
    /// backed by pages large enough to cover the LLC set-index bits.
    Virtual,

    /// Resolve every candidate through the pagemap first.
    Physical,
}

#[derive(Clone, Copy, Debug)]
pub struct FinderConfig {
    /// Maximum distance (in bytes) from the base address to search.
    pub radius: usize,
    pub indexing: Indexing,
}
impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            radius: Self::DEFAULT_RADIUS,
            indexing: Indexing::Virtual,
        }
    }
}
impl FinderConfig {
    pub const DEFAULT_RADIUS: usize = 16 * 1024 * 1024;

    pub fn radius(mut self, x: usize) -> Self {
        self.radius = x;
        self
    }
    pub fn indexing(mut self, x: Indexing) -> Self {
        self.indexing = x;
        self
    }
}

/// Finds addresses mapping to a particular LLC slice and set.
pub struct CollisionFinder<B: RaceBackend> {
    cfg: FinderConfig,
    geometry: CacheGeometry,
    locator: SliceLocator<B>,
    pagemap: PageMap,
}

impl<B: RaceBackend> CollisionFinder<B> {
    pub fn new(cfg: FinderConfig, geometry: CacheGeometry, locator: SliceLocator<B>)
        -> Result<Self>
    {
        geometry.validate()?;
        let pagemap = PageMap::new();
        Ok(Self { cfg, geometry, locator, pagemap })
    }

    pub fn config(&self) -> &FinderConfig { &self.cfg }
    pub fn geometry(&self) -> &CacheGeometry { &self.geometry }
    pub fn locator(&self) -> &SliceLocator<B> { &self.locator }
    pub fn locator_mut(&mut self) -> &mut SliceLocator<B> { &mut self.locator }

    /// Compute the LLC set index for `addr` using the configured
    /// [Indexing] strategy.
    pub fn llc_set(&self, addr: VirtAddr) -> Result<SetIndex> {
        match self.cfg.indexing {
            Indexing::Virtual => {
                Ok(self.geometry.set_index(addr, CacheLevel::Llc))
            },
            Indexing::Physical => {
                let paddr = self.pagemap.resolve(addr)?;
                Ok(self.geometry.set_index(paddr, CacheLevel::Llc))
            },
        }
    }

    fn check_set(&self, set: SetIndex) -> Result<()> {
        let sets = self.geometry.sets(CacheLevel::Llc);
        if set >= sets {
            return Err(Error::SetOutOfRange { set, sets });
        }
        Ok(())
    }

    /// Scan forward from `base + start` for a candidate on (`slice`, `set`).
    unsafe fn scan(&mut self, base: VirtAddr, start: usize, slice: SliceId,
        set: SetIndex) -> Result<usize>
    {
        let step = self.geometry.line_size();
        let mut offset = start;
        while offset < self.cfg.radius {
            let candidate = base.add(offset);
            if self.llc_set(candidate)? == set
                && unsafe { self.locator.locate_slice(candidate)? } == slice
            {
                return Ok(offset);
            }
            offset += step;
        }
        Err(Error::NoCollisionFound { base: base.0, radius: self.cfg.radius })
    }

    /// Return the smallest offset `off` (a multiple of the line size) such
    /// that `base + off` is in LLC set `set` and is located on `slice`.
    ///
    /// # Safety
    ///
    /// Every address in `[base, base + radius)` must be mapped, writable,
    /// and not otherwise in use.
    pub unsafe fn find_colliding_offset(&mut self, base: VirtAddr,
        slice: SliceId, set: SetIndex) -> Result<usize>
    {
        self.check_set(set)?;
        unsafe { self.scan(base, 0, slice, set) }
    }

    /// Return `count` distinct addresses on (`slice`, `set`), in ascending
    /// order, starting from `base`.
    ///
    /// # Safety
    ///
    /// See [CollisionFinder::find_colliding_offset].
    pub unsafe fn find_collisions(&mut self, base: VirtAddr, slice: SliceId,
        set: SetIndex, count: usize) -> Result<Vec<VirtAddr>>
    {
        self.check_set(set)?;
        let mut res = Vec::with_capacity(count);
        let mut next = 0;
        while res.len() < count {
            let offset = unsafe { self.scan(base, next, slice, set)? };
            let addr = base.add(offset);
            log::info!("found {} (+{:#x}) on slice {} set {}",
                addr, offset, slice, set);
            res.push(addr);
            next = offset + self.geometry.line_size();
        }
        Ok(res)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::locator::{ LocatorConfig, SimulatedRace, Topology };

    fn finder(radius: usize) -> CollisionFinder<SimulatedRace> {
        let geometry = CacheGeometry::skylake_sp().llc_mask(0xfc0).num_cores(4);
        let cfg = LocatorConfig::for_geometry(&geometry).unwrap().repeat(1);
        // Alternate slices every line
        let sim = SimulatedRace::new(|a| SliceId((a.0 >> 6) & 1), 0);
        let locator = SliceLocator::new(cfg, sim);
        CollisionFinder::new(FinderConfig::default().radius(radius), geometry, locator)
            .unwrap()
    }

    #[test]
    fn finds_first_match() {
        let mut f = finder(1 << 20);
        // Set 3 is line 3 of every page, which is always on slice 1
        let off = unsafe { f.find_colliding_offset(VirtAddr(0x10000), SliceId(1), 3).unwrap() };
        assert_eq!(off, 3 * 64);
        // Set 2 is never on slice 1
        assert!(matches!(
            unsafe { f.find_colliding_offset(VirtAddr(0x10000), SliceId(1), 2) },
            Err(Error::NoCollisionFound { base: 0x10000, radius: 0x10_0000 })
        ));
    }

    #[test]
    fn set_is_checked_before_slice() {
        let mut f = finder(0x2000);
        let off = unsafe { f.find_colliding_offset(VirtAddr(0), SliceId(0), 4).unwrap() };
        assert_eq!(off, 4 * 64);
        // Only candidates in set 4 were raced: one locate_slice, two trials,
        // two pairs each
        assert_eq!(f.locator().backend().races(), 4);
    }

    #[test]
    fn set_out_of_range() {
        let mut f = finder(1 << 20);
        assert!(matches!(
            unsafe { f.find_colliding_offset(VirtAddr(0), SliceId(0), 64) },
            Err(Error::SetOutOfRange { set: 64, sets: 64 })
        ));
    }

    #[test]
    fn collisions_are_one_page_apart() {
        let mut f = finder(1 << 20);
        let addrs = unsafe {
            f.find_collisions(VirtAddr(0x40000), SliceId(1), 5, 4).unwrap()
        };
        assert_eq!(addrs, vec![
            VirtAddr(0x40140), VirtAddr(0x41140),
            VirtAddr(0x42140), VirtAddr(0x43140),
        ]);
    }

    #[test]
    fn too_few_collisions() {
        let mut f = finder(0x3000);
        let res = unsafe { f.find_collisions(VirtAddr(0), SliceId(1), 5, 4) };
        assert!(matches!(res, Err(Error::NoCollisionFound { .. })));
    }

    #[test]
    fn custom_topology() {
        let geometry = CacheGeometry::skylake_sp().llc_mask(0xfc0);
        let topo = Topology::new(vec![
            crate::locator::CorePair::new(4, 5, SliceId(7)),
        ]).unwrap();
        let cfg = LocatorConfig::new(topo);
        let locator = SliceLocator::new(cfg, SimulatedRace::fixed(SliceId(7), 0));
        let mut f = CollisionFinder::new(FinderConfig::default(), geometry, locator)
            .unwrap();
        let off = unsafe { f.find_colliding_offset(VirtAddr(0x1000), SliceId(7), 63).unwrap() };
        assert_eq!(off, 63 * 64);
    }
}
