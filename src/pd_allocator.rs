//! PD allocator owned by a GPU VM/MM context.
//!
//! This module routes PD requests between the slab cache and the direct path
//! and owns the single lock guarding the cache.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, error};

use crate::config::PdCacheConfig;
use crate::direct;
use crate::size_class::SizeClass;
use crate::slab::{PdCache, PdCacheSnapshot, PdCacheStats};
use crate::{BlockHandle, BlockProvider, PdError, PdResult};

/// Where a PD lives: a backing block, a byte offset into it, and whether the
/// block is a shared slab page or dedicated to this PD.
///
/// Hand it back to [`PdAllocator::free`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct PdAllocation {
    mem: BlockHandle,
    offset: usize,
    size: usize,
    cached: bool,
}

impl PdAllocation {
    pub(crate) fn cached(mem: BlockHandle, offset: usize, size: usize) -> Self {
        Self {
            mem,
            offset,
            size,
            cached: true,
        }
    }

    pub(crate) fn direct(mem: BlockHandle, size: usize) -> Self {
        Self {
            mem,
            offset: 0,
            size,
            cached: false,
        }
    }

    /// Build an arbitrary descriptor, for exercising misuse paths.
    #[doc(hidden)]
    pub fn forge(mem: BlockHandle, offset: usize, size: usize, cached: bool) -> Self {
        Self {
            mem,
            offset,
            size,
            cached,
        }
    }

    pub fn mem(&self) -> BlockHandle {
        self.mem
    }

    /// Byte offset of the PD inside [`PdAllocation::mem`]. Always 0 for
    /// direct PDs.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the PD is packed into a slab page.
    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

pub struct PdAllocator<P: BlockProvider> {
    provider: P,
    config: PdCacheConfig,
    cache: SpinNoIrq<Option<PdCache>>,
    initialized: AtomicBool,
    bad_frees: AtomicUsize,
}

impl<P: BlockProvider> PdAllocator<P> {
    pub const fn new(provider: P, config: PdCacheConfig) -> Self {
        Self {
            provider,
            config,
            cache: SpinNoIrq::new(None),
            initialized: AtomicBool::new(false),
            bad_frees: AtomicUsize::new(0),
        }
    }

    /// Set up the PD cache. Called on every power-on, so an existing cache
    /// is kept as is.
    pub fn init(&self) -> PdResult {
        let mut cache = self.cache.lock();
        if cache.is_some() {
            return Ok(());
        }

        *cache = Some(PdCache::new(self.config)?);
        self.initialized.store(true, Ordering::SeqCst);
        debug!("PD cache initialized!");
        Ok(())
    }

    /// Destroy the PD cache.
    ///
    /// Fails with [`PdError::LeakDetected`], keeping the cache, while any PD
    /// is still allocated from it.
    pub fn teardown(&self) -> PdResult {
        let mut guard = self.cache.lock();
        let Some(cache) = guard.as_ref() else {
            return Ok(());
        };

        cache.check_leaks()?;
        *guard = None;
        self.initialized.store(false, Ordering::SeqCst);
        debug!("PD cache torn down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Allocate a `bytes` sized PD.
    ///
    /// PDs of a page or more get their own block; smaller ones must be a
    /// power of two no smaller than the configured minimum and are packed.
    pub fn alloc(&self, bytes: u32) -> PdResult<PdAllocation> {
        let bytes = bytes as usize;

        // Simple case: PD is at least a page so just do a regular block alloc.
        if bytes >= self.config.page_size {
            return direct::alloc_direct(&self.provider, &self.config, bytes);
        }

        if SizeClass::from_size(&self.config, bytes).is_none() {
            debug!("PD-Alloc [C]   Invalid (bytes={})", bytes);
            return Err(PdError::InvalidParam);
        }

        let mut guard = self.cache.lock();
        let Some(cache) = guard.as_mut() else {
            error!("pd allocator: PD cache not initialized");
            return Err(PdError::NoMemory);
        };
        cache.alloc(&self.provider, bytes)
    }

    /// Allocate a PD on a dedicated block regardless of its size.
    ///
    /// Needed for PDs that must be page aligned, such as the PDB.
    pub fn alloc_direct(&self, bytes: u32) -> PdResult<PdAllocation> {
        direct::alloc_direct(&self.provider, &self.config, bytes as usize)
    }

    /// Free a PD from [`PdAllocator::alloc`] or [`PdAllocator::alloc_direct`].
    ///
    /// Freeing a packed PD the cache does not know about is logged, counted
    /// in [`PdAllocator::bad_frees`] and otherwise ignored.
    pub fn free(&self, pd: PdAllocation) {
        // Simple case: just free the block.
        if !pd.is_cached() {
            return direct::free_direct(&self.provider, pd);
        }

        let result = match self.cache.lock().as_mut() {
            Some(cache) => cache.free(&self.provider, &pd),
            None => {
                error!(
                    "pd allocator: freeing pd {:#x}+{:#x} without a PD cache",
                    pd.mem().key(),
                    pd.offset()
                );
                Err(PdError::NotAllocated)
            }
        };

        if result.is_err() {
            self.bad_frees.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Number of frees rejected as unknown, misaligned or repeated.
    pub fn bad_frees(&self) -> usize {
        self.bad_frees.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PdCacheStats {
        self.cache
            .lock()
            .as_ref()
            .map(PdCache::stats)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<PdCacheSnapshot> {
        self.cache.lock().as_ref().map(PdCache::snapshot)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}
