//! Set indexes, and how they relate to physical address resolution.

use memmap2::MmapOptions;
use rand::prelude::*;
use rand::rngs::StdRng;
use slicemap::*;
use slicemap::util::pagemap::{ compose, PageMap };

const HUGE_SHIFT: u32 = 21;

#[test]
fn synthetic_llc_scenario() {
    let g = CacheGeometry::skylake_sp()
        .l1_mask(0xfc0)
        .l2_mask(0xfc0)
        .llc_mask(0xfc0);
    assert_eq!(g.sets(CacheLevel::Llc), 64);
    assert_eq!(g.set_index(VirtAddr(0x1000), CacheLevel::Llc), 0);
    assert_eq!(g.set_index(VirtAddr(0x1fc0), CacheLevel::Llc), 63);
}

#[test]
fn huge_pages_preserve_set_index() {
    let mut rng = StdRng::seed_from_u64(21);
    for g in [CacheGeometry::skylake_sp(), CacheGeometry::neoverse_n1()] {
        for _ in 0..1000 {
            let vaddr = VirtAddr(rng.gen_range(0..(1usize << 47)));
            let pfn = rng.gen_range(1..(1usize << 18));
            let paddr = compose(pfn, vaddr, HUGE_SHIFT);
            for level in CacheLevel::ALL {
                assert!(g.virtually_indexable(level, HUGE_SHIFT));
                assert_eq!(g.set_index(paddr, level), g.set_index(vaddr, level));
            }
        }
    }
}

#[test]
fn base_pages_only_preserve_l1() {
    let g = CacheGeometry::skylake_sp();
    let vaddr = VirtAddr(0x7f00_0000_0040);
    let paddr = compose(1, vaddr, 12);
    assert_eq!(g.set_index(paddr, CacheLevel::L1), g.set_index(vaddr, CacheLevel::L1));
    assert_ne!(g.set_index(paddr, CacheLevel::Llc), g.set_index(vaddr, CacheLevel::Llc));
    assert!(!g.virtually_indexable(CacheLevel::Llc, 12));
}

#[test]
fn unbacked_memory_is_not_resident() {
    let buf = MmapOptions::new().len(1 << 20).map_anon().unwrap();
    let pm = PageMap::new();
    for off in (0..buf.len()).step_by(1 << 16) {
        let vaddr = VirtAddr::from_ptr(buf.as_ptr()).add(off);
        match pm.resolve(vaddr) {
            Err(Error::PageNotResident { vaddr: v, swapped: false }) => {
                assert_eq!(v, vaddr.0);
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn resident_memory_never_fabricates() {
    let mut buf = MmapOptions::new().len(1 << 16).map_anon().unwrap();
    buf[0] = 1;
    let vaddr = VirtAddr::from_ptr(buf.as_ptr());
    // Unprivileged readers see PFN 0, which must not turn into an address
    match resolve_physical(vaddr) {
        Ok(p) => assert_eq!(p.0 & 0xfff, 0),
        Err(Error::FrameHidden { vaddr: v }) => assert_eq!(v, vaddr.0),
        Err(e) => panic!("unexpected {}", e),
    }
}

#[test]
#[ignore]
fn huge_page_mapping_matches_pagemap() {
    // Needs reserved huge pages and CAP_SYS_ADMIN
    let g = CacheGeometry::skylake_sp();
    let buf = HostEnv::map_buffer(1 << HUGE_SHIFT, true, true).unwrap();
    let base = VirtAddr::from_ptr(buf.as_ptr());
    let pm = PageMap::new();
    for off in (0..buf.len()).step_by(0x1_0040) {
        let vaddr = base.add(off);
        let paddr = pm.resolve(vaddr).unwrap();
        assert_eq!(g.set_index(paddr, CacheLevel::Llc), g.set_index(vaddr, CacheLevel::Llc));
    }
}
