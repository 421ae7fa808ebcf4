//! Known LLC slice-selection functions.
//!
//! Some parts are known to select a slice by computing the parity of a
//! few subsets of the physical address bits, where each subset produces
//! one bit of the slice index. This doesn't hold for every part (and it's
//! never used by [crate::locator]), but it's a convenient source of
//! ground truth for simulations.
//!
//! ```
//! use slicemap::hash::SliceHash;
//! use slicemap::geometry::{ PhysAddr, SliceId };
//!
//! let h = SliceHash::sandybridge_to_skylake(4).unwrap();
//! assert_eq!(h.slices(), 4);
//! assert_eq!(h.hash(PhysAddr(0)), SliceId(0));
//! ```

use crate::geometry::{ Address, SliceId };

/// Functions used on most power-of-two core count parts from Sandy Bridge
/// to Skylake (client).
const SANDYBRIDGE_TO_SKYLAKE_FUNCTIONS: [usize; 3] = [
    0b0110_1101_0111_1101_0101_1101_0101_0001_000000,
    0b1011_1010_1101_0111_1110_1010_1010_0010_000000,
    0b1111_0011_0011_0011_0010_0100_1100_0100_000000,
];

/// Functions used on the Core i9-9900 (Coffee Lake R).
#[allow(non_upper_case_globals)]
const COFFEELAKE_R_i9_FUNCTIONS: [usize; 3] = [
    0b0000_1111_1111_1101_0101_1101_0101_0001_000000,
    0b0000_0110_1111_1011_1010_1100_0100_1000_000000,
    0b0000_1111_1110_0001_1111_1100_1011_0000_000000,
];

/// An XOR-parity slice-selection function.
///
/// The N-th mask computes bit `N` of the slice index (from the most
/// significant bit down).
#[derive(Clone, Copy, Debug)]
pub struct SliceHash {
    functions: &'static [usize],
}
impl SliceHash {
    pub const fn new(functions: &'static [usize]) -> Self {
        Self { functions }
    }

    fn for_slices(table: &'static [usize; 3], slices: usize) -> Option<Self> {
        if !slices.is_power_of_two() || slices < 2 {
            return None;
        }
        let bits = slices.trailing_zeros() as usize;
        table.get(..bits).map(Self::new)
    }

    /// Sandy Bridge to Skylake with 2, 4 or 8 slices.
    pub fn sandybridge_to_skylake(slices: usize) -> Option<Self> {
        Self::for_slices(&SANDYBRIDGE_TO_SKYLAKE_FUNCTIONS, slices)
    }

    /// Coffee Lake R (i9-9900) with 2, 4 or 8 slices.
    pub fn coffeelake_r(slices: usize) -> Option<Self> {
        Self::for_slices(&COFFEELAKE_R_i9_FUNCTIONS, slices)
    }

    /// Number of slices this function can select.
    pub fn slices(&self) -> usize { 1 << self.functions.len() }

    pub fn hash<A: Address>(&self, addr: A) -> SliceId {
        let mut res = 0;
        for mask in self.functions {
            res <<= 1;
            res |= ((addr.value() & mask).count_ones() & 1) as usize;
        }
        SliceId(res)
    }
}
