//! Collision search, checked by re-deriving the (slice, set) pair of
//! every address it returns.

use rand::prelude::*;
use rand::rngs::StdRng;
use slicemap::*;
use slicemap::hash::SliceHash;

const SLICES: usize = 8;

fn geometry() -> CacheGeometry {
    CacheGeometry::skylake_sp()
        .llc_mask(0xfc0)
        .num_cores(2 * SLICES)
}

fn hash() -> SliceHash {
    SliceHash::sandybridge_to_skylake(SLICES).unwrap()
}

fn locator(seed: u64) -> SliceLocator<SimulatedRace> {
    let cfg = LocatorConfig::for_geometry(&geometry()).unwrap().repeat(1);
    let sim = SimulatedRace::from_hash(hash(), seed).noise(100_000);
    SliceLocator::new(cfg, sim)
}

fn finder(seed: u64) -> CollisionFinder<SimulatedRace> {
    CollisionFinder::new(FinderConfig::default(), geometry(), locator(seed))
        .unwrap()
}

#[test]
fn returned_offsets_rederive() {
    let mut rng = StdRng::seed_from_u64(1234);
    let mut f = finder(0);
    let mut check = locator(99);
    let g = geometry();
    let sets = g.sets(CacheLevel::Llc);

    for _ in 0..64 {
        let base = VirtAddr(rng.gen_range(0..(1usize << 40)) & !0x3f);
        let slice = SliceId(rng.gen_range(0..SLICES));
        let set = rng.gen_range(0..sets);

        let off = unsafe { f.find_colliding_offset(base, slice, set).unwrap() };
        let hit = base.add(off);
        assert_eq!(off % g.line_size(), 0);
        assert!(off < f.config().radius);
        assert_eq!(g.set_index(hit, CacheLevel::Llc), set);
        assert_eq!(unsafe { check.locate_slice(hit).unwrap() }, slice);

        // Nothing earlier in the scan matched
        for earlier in (0..off).step_by(g.line_size()) {
            let a = base.add(earlier);
            assert!(g.set_index(a, CacheLevel::Llc) != set
                || hash().hash(PhysAddr(a.0)) != slice);
        }
    }
}

#[test]
fn address_sets_are_distinct() {
    let mut f = finder(5);
    let g = geometry();
    let base = VirtAddr(0x7f12_3450_0000);
    let addrs = unsafe {
        f.find_collisions(base, SliceId(6), 17, 12).unwrap()
    };
    assert_eq!(addrs.len(), 12);
    for w in addrs.windows(2) {
        assert!(w[0] < w[1]);
    }
    for a in addrs.iter() {
        assert_eq!(g.set_index(*a, CacheLevel::Llc), 17);
        assert_eq!(hash().hash(PhysAddr(a.0)), SliceId(6));
    }
}

#[test]
fn search_is_bounded() {
    // Every address is on slice 0, so slice 1 never turns up
    let cfg = LocatorConfig::for_geometry(&geometry()).unwrap();
    let sim = SimulatedRace::fixed(SliceId(0), 0);
    let locator = SliceLocator::new(cfg, sim);
    let fcfg = FinderConfig::default().radius(64 * 1024);
    let mut f = CollisionFinder::new(fcfg, geometry(), locator).unwrap();

    match unsafe { f.find_colliding_offset(VirtAddr(0x10_0000), SliceId(1), 0) } {
        Err(Error::NoCollisionFound { base, radius }) => {
            assert_eq!(base, 0x10_0000);
            assert_eq!(radius, 64 * 1024);
        },
        other => panic!("unexpected {:?}", other),
    }
    // One candidate per page was raced
    assert_eq!(f.locator().stats().located, 16);
}

#[test]
fn invalid_geometry_is_rejected() {
    let bad = geometry().llc_mask(0x1f80);
    let res = CollisionFinder::new(FinderConfig::default(), bad, locator(0));
    assert!(matches!(res, Err(Error::InvalidGeometry(_))));
}

#[test]
#[ignore]
fn physical_indexing_on_real_memory() {
    // Needs CAP_SYS_ADMIN for pagemap frame numbers
    let g = CacheGeometry::skylake_sp().num_cores(2 * SLICES);
    let buf = HostEnv::map_buffer(1 << 22, false, true).unwrap();
    let base = VirtAddr::from_ptr(buf.as_ptr());
    let fcfg = FinderConfig::default()
        .radius(buf.len())
        .indexing(Indexing::Physical);
    let mut f = CollisionFinder::new(fcfg, g, locator(0)).unwrap();
    let off = unsafe { f.find_colliding_offset(base, SliceId(0), 3).unwrap() };
    let paddr = resolve_physical(base.add(off)).unwrap();
    assert_eq!(g.set_index(paddr, CacheLevel::Llc), 3);
}
