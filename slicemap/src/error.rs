//! Error type shared by every measurement in this crate.

use std::fmt;

/// Failures surfaced by address resolution, slice location and the
/// collision search.
#[derive(Debug)]
pub enum Error {
    /// The pagemap entry for `vaddr` has the "present" bit clear.
    PageNotResident { vaddr: usize, swapped: bool },

    /// The page is present, but the kernel hid the frame number from us
    /// (unprivileged readers get PFN 0).
    FrameHidden { vaddr: usize },

    /// Couldn't open or read `/proc/self/pagemap`.
    Pagemap(std::io::Error),

    /// Couldn't map a measurement buffer.
    Mmap(std::io::Error),

    /// An untyped cache level number outside of {1, 2, 3}.
    InvalidCacheLevel(u8),

    /// `sched_setaffinity()` refused to pin a thread to `core`.
    AffinityPinFailed { core: usize, errno: nix::Error },

    /// No two consecutive trials agreed before the retry budget ran out.
    SliceDeterminationFailed { vaddr: usize, attempts: usize },

    /// Nothing in `[base, base + radius)` mapped to the requested
    /// (slice, set) pair.
    NoCollisionFound { base: usize, radius: usize },

    /// The requested set index doesn't exist in the LLC geometry.
    SetOutOfRange { set: usize, sets: usize },

    InvalidGeometry(&'static str),
    InvalidTopology(&'static str),

    /// The instruction cache flush gadget couldn't be emitted.
    Jit(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageNotResident { vaddr, swapped: true } => {
                write!(f, "page for {:#018x} is not present (swapped out)", vaddr)
            },
            Self::PageNotResident { vaddr, swapped: false } => {
                write!(f, "page for {:#018x} is not present", vaddr)
            },
            Self::FrameHidden { vaddr } => {
                write!(f, "got PFN 0 for {:#018x} (do you have permission?)", vaddr)
            },
            Self::Pagemap(e) => {
                write!(f, "couldn't read /proc/self/pagemap: {}", e)
            },
            Self::Mmap(e) => write!(f, "couldn't map buffer: {}", e),
            Self::InvalidCacheLevel(n) => {
                write!(f, "invalid cache level {} (expected 1, 2 or 3)", n)
            },
            Self::AffinityPinFailed { core, errno } => {
                write!(f, "couldn't pin to core {}: {} ({})",
                    core, errno, errno.desc())
            },
            Self::SliceDeterminationFailed { vaddr, attempts } => {
                write!(f, "no agreeing trials for {:#018x} after {} attempts",
                    vaddr, attempts)
            },
            Self::NoCollisionFound { base, radius } => {
                write!(f, "no colliding address within {:#x} bytes of {:#018x}",
                    radius, base)
            },
            Self::SetOutOfRange { set, sets } => {
                write!(f, "set {} is out of range (LLC has {} sets)", set, sets)
            },
            Self::InvalidGeometry(msg) => write!(f, "invalid cache geometry: {}", msg),
            Self::InvalidTopology(msg) => write!(f, "invalid core topology: {}", msg),
            Self::Jit(msg) => write!(f, "couldn't emit flush gadget: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pagemap(e) | Self::Mmap(e) => Some(e),
            Self::AffinityPinFailed { errno, .. } => Some(errno),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Pagemap(e)
    }
}
