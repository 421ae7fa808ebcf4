//! Locating the LLC slice and cache sets backing an address.
//!
//! - [timer] and [access] are the primitives used to take measurements
//! - [geometry] describes the cache hierarchy and computes set indexes
//! - [util::pagemap] resolves virtual addresses to physical addresses
//! - [locator] measures the LLC slice for an address
//! - [finder] searches for other addresses on the same (slice, set) pair
//! - [gadget] emits a branch chain for evicting the L1 instruction cache
//!

pub mod error;
pub mod timer;
pub mod access;
pub mod geometry;
pub mod locator;
pub mod finder;
pub mod gadget;
pub mod hash;
pub mod stats;
pub mod util;

pub use crate::error::{ Error, Result };
pub use crate::geometry::*;
pub use crate::locator::{
    CorePair,
    LocatorConfig,
    LocatorStats,
    RaceBackend,
    SimulatedRace,
    SliceLocator,
    ThreadedRace,
    Topology,
    TrialOutcome,
};
pub use crate::finder::{ CollisionFinder, FinderConfig, Indexing };
pub use crate::gadget::ICacheFlusher;
pub use crate::util::HostEnv;
pub use crate::util::pagemap::resolve_physical;
