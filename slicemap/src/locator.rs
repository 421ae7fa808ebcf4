//! Determining the LLC slice for an address.
//!
//! There's no documented function from physical addresses to LLC slices,
//! so [SliceLocator] measures it instead. For every [CorePair] in the
//! [Topology], a "loader" thread hammers the target line with
//! read-modify-writes while a "prober" thread times a long burst of loads
//! from the same line. After sweeping every pair, the pair whose prober
//! observed the *smallest* elapsed time wins, and its slice label is the
//! answer for that trial.
//!
//! A single sweep is noisy. [SliceLocator::locate_slice] always runs two
//! sweeps and only returns when they agree, retrying otherwise (up to
//! [LocatorConfig::max_retries]).
//!
//! The races themselves are performed by a [RaceBackend]:
//!
//! - [ThreadedRace] runs the real measurement on pinned threads
//! - [SimulatedRace] models the outcome from a known slice function
//!

pub mod race;
pub mod sim;

pub use race::*;
pub use sim::*;

use std::collections::BTreeMap;
use crate::error::{ Error, Result };
use crate::geometry::{ CacheGeometry, SliceId, VirtAddr };
use crate::stats::RawResults;

/// A prober core, the loader core it races against, and the slice label
/// reported when this pair wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorePair {
    pub prober: usize,
    pub loader: usize,
    pub slice: SliceId,
}
impl CorePair {
    pub const fn new(prober: usize, loader: usize, slice: SliceId) -> Self {
        Self { prober, loader, slice }
    }
}

/// The set of core pairs swept during a trial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pairs: Vec<CorePair>,
}
impl Topology {
    pub fn new(pairs: Vec<CorePair>) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Error::InvalidTopology("no core pairs"));
        }
        if pairs.iter().any(|p| p.prober == p.loader) {
            return Err(Error::InvalidTopology(
                "prober and loader must be different cores"
            ));
        }
        Ok(Self { pairs })
    }

    /// Pair core `2k` (prober) with core `2k + 1` (loader), labelling the
    /// pair as slice `k`. A trailing odd core is left unused.
    pub fn adjacent_pairs(num_cores: usize) -> Result<Self> {
        if num_cores < 2 {
            return Err(Error::InvalidTopology("need at least two cores"));
        }
        let pairs = (0..num_cores / 2)
            .map(|k| CorePair::new(2 * k, 2 * k + 1, SliceId(k)))
            .collect();
        Self::new(pairs)
    }

    pub fn pairs(&self) -> &[CorePair] { &self.pairs }

    /// Number of distinct slice labels.
    pub fn num_slices(&self) -> usize {
        let mut labels: Vec<SliceId> = self.pairs.iter().map(|p| p.slice).collect();
        labels.sort();
        labels.dedup();
        labels.len()
    }
}

/// Configuration for a [SliceLocator].
#[derive(Clone, Debug)]
pub struct LocatorConfig {
    /// Number of loads timed by the prober in each race.
    pub repeat: usize,

    /// Number of times a disagreeing pair of trials is retried before
    /// giving up. `None` retries forever.
    pub max_retries: Option<usize>,

    pub topology: Topology,
}
impl LocatorConfig {
    pub const DEFAULT_REPEAT: usize = 100_000;
    pub const DEFAULT_MAX_RETRIES: usize = 64;

    pub fn new(topology: Topology) -> Self {
        Self {
            repeat: Self::DEFAULT_REPEAT,
            max_retries: Some(Self::DEFAULT_MAX_RETRIES),
            topology,
        }
    }

    /// Adjacent core pairs over every core in `geometry`.
    pub fn for_geometry(geometry: &CacheGeometry) -> Result<Self> {
        Ok(Self::new(Topology::adjacent_pairs(geometry.num_cores)?))
    }

    pub fn repeat(mut self, x: usize) -> Self {
        self.repeat = x;
        self
    }
    pub fn max_retries(mut self, x: Option<usize>) -> Self {
        self.max_retries = x;
        self
    }
    pub fn topology(mut self, x: Topology) -> Self {
        self.topology = x;
        self
    }
}

/// Implemented on types that can race a prober against a loader.
pub trait RaceBackend {
    /// Return the number of cycles the prober in `pair` needed to perform
    /// `repeat` loads from `addr` while the loader was contending for it.
    ///
    /// # Safety
    ///
    /// Implementations may dereference `addr`: the word containing it must
    /// be mapped, writable and not otherwise in use for the duration of
    /// the call.
    unsafe fn race(&mut self, addr: VirtAddr, pair: &CorePair, repeat: usize)
        -> Result<u64>;
}

impl<B: RaceBackend + ?Sized> RaceBackend for Box<B> {
    unsafe fn race(&mut self, addr: VirtAddr, pair: &CorePair, repeat: usize)
        -> Result<u64>
    {
        unsafe { (**self).race(addr, pair, repeat) }
    }
}

/// The result of a single sweep over every core pair.
#[derive(Clone, Debug)]
pub struct TrialOutcome {
    /// Slice label of the fastest pair.
    pub slice: SliceId,

    /// Prober timings, in sweep order.
    pub timings: Vec<(CorePair, u64)>,
}
impl TrialOutcome {
    /// Return the winning timing.
    pub fn best(&self) -> Option<u64> {
        self.timings.iter().map(|(_, t)| *t).min()
    }
}

/// Counters kept across calls on a [SliceLocator].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocatorStats {
    /// Number of sweeps performed
    pub trials: usize,
    /// Number of times a pair of sweeps disagreed
    pub mismatches: usize,
    /// Number of addresses successfully located
    pub located: usize,
}

/// Measures the LLC slice for virtual addresses.
pub struct SliceLocator<B: RaceBackend> {
    cfg: LocatorConfig,
    backend: B,
    stats: LocatorStats,
}

impl SliceLocator<ThreadedRace> {
    /// Create a locator that races real threads.
    pub fn threaded(cfg: LocatorConfig) -> Self {
        Self::new(cfg, ThreadedRace::new())
    }
}

impl<B: RaceBackend> SliceLocator<B> {
    pub fn new(cfg: LocatorConfig, backend: B) -> Self {
        Self { cfg, backend, stats: LocatorStats::default() }
    }

    pub fn config(&self) -> &LocatorConfig { &self.cfg }
    pub fn stats(&self) -> LocatorStats { self.stats }
    pub fn backend(&self) -> &B { &self.backend }
    pub fn backend_mut(&mut self) -> &mut B { &mut self.backend }

    /// Sweep every core pair once and pick the fastest prober.
    ///
    /// Ties go to the pair that comes first in the topology.
    ///
    /// # Safety
    ///
    /// See [RaceBackend::race].
    pub unsafe fn trial(&mut self, addr: VirtAddr) -> Result<TrialOutcome> {
        let mut timings = Vec::with_capacity(self.cfg.topology.pairs().len());
        for pair in self.cfg.topology.pairs() {
            let elapsed = unsafe {
                self.backend.race(addr, pair, self.cfg.repeat)?
            };
            log::debug!("{} prober={} loader={} slice={} elapsed={}",
                addr, pair.prober, pair.loader, pair.slice, elapsed);
            timings.push((*pair, elapsed));
        }
        self.stats.trials += 1;

        // NOTE: [Iterator::min_by_key] returns the first of several
        // equal elements.
        let slice = timings.iter()
            .min_by_key(|(_, t)| *t)
            .map(|(pair, _)| pair.slice)
            .ok_or(Error::InvalidTopology("no core pairs"))?;
        Ok(TrialOutcome { slice, timings })
    }

    /// Determine the LLC slice for `addr`.
    ///
    /// Two independent trials are run; if they disagree, both are thrown
    /// away and the pair is retried.
    ///
    /// # Safety
    ///
    /// See [RaceBackend::race].
    pub unsafe fn locate_slice(&mut self, addr: VirtAddr) -> Result<SliceId> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let t1 = unsafe { self.trial(addr)? };
            let t2 = unsafe { self.trial(addr)? };
            if t1.slice == t2.slice {
                self.stats.located += 1;
                return Ok(t1.slice);
            }

            self.stats.mismatches += 1;
            log::warn!("mismatch! address {} slice {} - {} (attempt {})",
                addr, t1.slice, t2.slice, attempts);
            if let Some(max) = self.cfg.max_retries {
                if attempts > max {
                    return Err(Error::SliceDeterminationFailed {
                        vaddr: addr.0,
                        attempts,
                    });
                }
            }
        }
    }

    /// Run `rounds` sweeps over `addr` and collect the observed timings
    /// for each slice label.
    ///
    /// # Safety
    ///
    /// See [RaceBackend::race].
    pub unsafe fn survey(&mut self, addr: VirtAddr, rounds: usize)
        -> Result<BTreeMap<SliceId, RawResults>>
    {
        let mut res: BTreeMap<SliceId, RawResults> = BTreeMap::new();
        for _ in 0..rounds {
            let outcome = unsafe { self.trial(addr)? };
            for (pair, elapsed) in outcome.timings {
                res.entry(pair.slice).or_default().push(elapsed);
            }
        }
        Ok(res)
    }
}
