//! GPU page directory cache
//!
//! Packs many small, power-of-two sized page directories (PDs) into shared
//! page-sized backing blocks, featuring:
//! - Size-classed slab cache for PDs smaller than a page
//! - Occupancy bitmaps with find-first-clear slot selection
//! - Reverse lookup from backing block to slab, so a PD is freed from its
//!   descriptor alone
//! - Direct path for page-sized and larger PDs

#![no_std]

extern crate alloc;

use core::fmt;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size for backward compatibility
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Smallest PD the cache packs by default.
pub const DEFAULT_MIN_PD_SIZE: usize = 256;

/// The error type used for PD allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdError {
    /// Invalid PD size or cache configuration (e.g. not a power of two).
    InvalidParam,
    /// The block provider could not supply backing memory.
    NoMemory,
    /// Freeing a PD the cache does not know about, or one already freed.
    NotAllocated,
    /// Teardown found PDs still allocated.
    LeakDetected,
}

impl fmt::Display for PdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PdError::InvalidParam => "invalid PD size or cache configuration",
            PdError::NoMemory => "out of backing memory",
            PdError::NotAllocated => "PD is not allocated from this cache",
            PdError::LeakDetected => "PDs still allocated at teardown",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`PdError`] as the error type.
pub type PdResult<T = ()> = Result<T, PdError>;

/// Opaque identity of one backing block handed out by a [`BlockProvider`].
///
/// The key is chosen by the provider and must be unique among its live
/// blocks; the cache orders and looks up slabs by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHandle {
    key: u64,
    size: usize,
}

impl BlockHandle {
    pub const fn new(key: u64, size: usize) -> Self {
        Self { key, size }
    }

    /// Provider-chosen identity of the block.
    pub const fn key(&self) -> u64 {
        self.key
    }

    /// Size of the block in bytes, as requested from the provider.
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Supplier of page-aligned backing blocks (DMA memory in a real driver).
///
/// Implementations must be thread-safe: the direct path calls them without
/// holding the cache lock. They must never call back into the cache.
///
/// When a new slab is needed, or an empty one is released, the provider is
/// called with the cache's `SpinNoIrq` lock held and interrupts disabled, so
/// neither method may sleep or block on anything that can.
pub trait BlockProvider: Send + Sync {
    /// Allocate a page-aligned block of `size` bytes. `contiguous` asks for
    /// physically contiguous memory.
    fn alloc_block(&self, size: usize, contiguous: bool) -> PdResult<BlockHandle>;

    /// Return a block obtained from [`BlockProvider::alloc_block`].
    fn free_block(&self, block: BlockHandle);
}

impl<P: BlockProvider + ?Sized> BlockProvider for &P {
    fn alloc_block(&self, size: usize, contiguous: bool) -> PdResult<BlockHandle> {
        (**self).alloc_block(size, contiguous)
    }

    fn free_block(&self, block: BlockHandle) {
        (**self).free_block(block)
    }
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

pub mod config;
pub use config::PdCacheConfig;

pub mod size_class;
pub use size_class::SizeClass;

pub mod slab;
pub use slab::{PdCache, PdCacheSnapshot, PdCacheStats, PdSlabState};

pub mod direct;

pub mod provider;
pub use provider::HeapBlockProvider;

pub mod pd_allocator;
pub use pd_allocator::{PdAllocation, PdAllocator};
