//! A model of the prober/loader race, for tests and dry runs.

use rand::prelude::*;
use rand::rngs::StdRng;
use crate::error::Result;
use crate::geometry::{ PhysAddr, SliceId, VirtAddr };
use crate::hash::SliceHash;
use crate::locator::{ CorePair, RaceBackend };

/// Simulates races without touching memory.
///
/// The pair whose slice label matches the "true" slice for an address
/// observes `near` cycles, every other pair observes `far` cycles.
/// Each observation has uniform noise in `[0, noise]` added to it.
/// As long as `noise < far - near`, every trial picks the true slice.
pub struct SimulatedRace {
    truth: Box<dyn Fn(VirtAddr) -> SliceId>,
    near: u64,
    far: u64,
    noise: u64,
    rng: StdRng,
    races: usize,
}

impl SimulatedRace {
    pub const DEFAULT_NEAR: u64 = 1_000_000;
    pub const DEFAULT_FAR: u64 = 1_200_000;

    /// Use `truth` to decide which slice an address belongs to.
    pub fn new(truth: impl Fn(VirtAddr) -> SliceId + 'static, seed: u64) -> Self {
        Self {
            truth: Box::new(truth),
            near: Self::DEFAULT_NEAR,
            far: Self::DEFAULT_FAR,
            noise: 0,
            rng: StdRng::seed_from_u64(seed),
            races: 0,
        }
    }

    /// Every address belongs to `slice`.
    pub fn fixed(slice: SliceId, seed: u64) -> Self {
        Self::new(move |_| slice, seed)
    }

    /// Pretend virtual addresses are identity-mapped, and select slices
    /// with `hash`.
    pub fn from_hash(hash: SliceHash, seed: u64) -> Self {
        Self::new(move |vaddr| hash.hash(PhysAddr(vaddr.0)), seed)
    }

    pub fn near(mut self, x: u64) -> Self {
        self.near = x;
        self
    }
    pub fn far(mut self, x: u64) -> Self {
        self.far = x;
        self
    }
    pub fn noise(mut self, x: u64) -> Self {
        self.noise = x;
        self
    }

    /// The slice this model assigns to `addr`.
    pub fn true_slice(&self, addr: VirtAddr) -> SliceId {
        (self.truth)(addr)
    }

    /// Number of races simulated so far.
    pub fn races(&self) -> usize { self.races }
}

impl RaceBackend for SimulatedRace {
    unsafe fn race(&mut self, addr: VirtAddr, pair: &CorePair, _repeat: usize)
        -> Result<u64>
    {
        self.races += 1;
        let base = if pair.slice == self.true_slice(addr) {
            self.near
        } else {
            self.far
        };
        Ok(base + self.rng.gen_range(0..=self.noise))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn noise_is_bounded() {
        let mut sim = SimulatedRace::fixed(SliceId(1), 7).near(100).far(500).noise(50);
        let hit = CorePair::new(2, 3, SliceId(1));
        let miss = CorePair::new(0, 1, SliceId(0));
        for _ in 0..1000 {
            let t = unsafe { sim.race(VirtAddr(0), &hit, 1).unwrap() };
            assert!((100..=150).contains(&t));
            let t = unsafe { sim.race(VirtAddr(0), &miss, 1).unwrap() };
            assert!((500..=550).contains(&t));
        }
        assert_eq!(sim.races(), 2000);
    }

    #[test]
    fn same_seed_same_observations() {
        let pair = CorePair::new(0, 1, SliceId(0));
        let mut a = SimulatedRace::fixed(SliceId(0), 42).noise(1000);
        let mut b = SimulatedRace::fixed(SliceId(0), 42).noise(1000);
        for _ in 0..100 {
            unsafe {
                assert_eq!(
                    a.race(VirtAddr(0), &pair, 1).unwrap(),
                    b.race(VirtAddr(0), &pair, 1).unwrap()
                );
            }
        }
    }

    #[test]
    fn hash_truth() {
        let h = SliceHash::sandybridge_to_skylake(2).unwrap();
        let sim = SimulatedRace::from_hash(h, 0);
        assert_eq!(sim.true_slice(VirtAddr(1 << 6)), SliceId(1));
        assert_eq!(sim.true_slice(VirtAddr(1 << 7)), SliceId(0));
    }
}
