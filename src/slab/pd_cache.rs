//! The PD slab cache.
//!
//! Per size class the cache keeps a partial list (slabs with at least one
//! free slot) and a full list. Slabs are created on demand, one backing page
//! each, and handed back to the provider as soon as their last PD is freed.
//! The mem tree maps each backing block back to its slab so a PD can be freed
//! from its descriptor alone.
//!
//! The cache itself is not synchronized; [`crate::PdAllocator`] wraps it in
//! the single cache lock.

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, error, warn};

use super::mem_tree::MemTree;
use super::pd_slab::{PdSlab, PdSlabState};
use super::slab_list::{SlabArena, SlabId, SlabList};
use crate::config::PdCacheConfig;
use crate::pd_allocator::PdAllocation;
use crate::size_class::SizeClass;
use crate::{BlockHandle, BlockProvider, PdError, PdResult};

/// Counters describing what the cache currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdCacheStats {
    pub slabs: usize,
    pub partial_slabs: usize,
    pub full_slabs: usize,
    pub pds_in_use: usize,
    pub backing_bytes: usize,
}

/// Membership and occupancy of one size class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSnapshot {
    pub size: usize,
    /// `(block, occupancy bits)` front to back.
    pub partial: Vec<(BlockHandle, u64)>,
    pub full: Vec<(BlockHandle, u64)>,
}

/// Complete observable state of a cache, comparable across operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdCacheSnapshot {
    pub classes: Vec<ClassSnapshot>,
    /// Mem tree keys in ascending order.
    pub mem_tree: Vec<BlockHandle>,
}

impl PdCacheSnapshot {
    /// Backing blocks currently owned by the class serving `size` bytes.
    pub fn blocks_of(&self, size: usize) -> impl Iterator<Item = BlockHandle> + '_ {
        self.classes
            .iter()
            .filter(move |class| class.size == size)
            .flat_map(|class| class.partial.iter().chain(class.full.iter()))
            .map(|&(mem, _)| mem)
    }
}

pub struct PdCache {
    config: PdCacheConfig,
    partial: Vec<SlabList>,
    full: Vec<SlabList>,
    slabs: SlabArena,
    mem_tree: MemTree,
}

impl PdCache {
    pub fn new(config: PdCacheConfig) -> PdResult<Self> {
        config.validate()?;

        let classes = config.class_count();
        Ok(Self {
            config,
            partial: (0..classes).map(|_| SlabList::new()).collect(),
            full: (0..classes).map(|_| SlabList::new()).collect(),
            slabs: SlabArena::new(),
            mem_tree: MemTree::new(),
        })
    }

    /// Allocate a `bytes` sized PD out of a shared page.
    ///
    /// `bytes` must be a power of two in `[min_size, page_size)`.
    pub fn alloc<P: BlockProvider + ?Sized>(
        &mut self,
        provider: &P,
        bytes: usize,
    ) -> PdResult<PdAllocation> {
        debug!("PD-Alloc [C] {} bytes", bytes);

        let Some(size_class) = SizeClass::from_size(&self.config, bytes) else {
            debug!("PD-Alloc [C]   Invalid (bytes={})", bytes);
            return Err(PdError::InvalidParam);
        };

        let result = match self.partial[size_class.to_index()].front() {
            Some(id) => self.alloc_from_partial(id, size_class),
            None => self.alloc_new(provider, size_class),
        };

        if result.is_err() {
            debug!("PD-Alloc [C] Failed!");
        }
        result
    }

    /// Start a new slab for `size_class` and hand out its first slot.
    fn alloc_new<P: BlockProvider + ?Sized>(
        &mut self,
        provider: &P,
        size_class: SizeClass,
    ) -> PdResult<PdAllocation> {
        debug!("PD-Alloc [C]   New: offs=0");

        let mem = provider
            .alloc_block(self.config.page_size, self.config.force_contiguous())
            .map_err(|_| {
                warn!(
                    "pd cache: unable to allocate a {:#x} byte backing block",
                    self.config.page_size
                );
                PdError::NoMemory
            })?;

        let mut slab = PdSlab::new(mem, size_class);
        let Some(index) = slab.claim_free_slot() else {
            provider.free_block(mem);
            error!("pd cache: fresh slab has no free slot");
            return Err(PdError::NoMemory);
        };
        let offset = slab.slot_offset(index);
        let full = slab.is_full();

        let id = self.slabs.insert(slab);
        if !self.mem_tree.insert(mem, id) {
            // The provider handed out a key that is still live; leave that
            // block alone rather than free memory another slab owns.
            self.slabs.remove(id);
            error!(
                "pd cache: backing block {:#x} is already tracked",
                mem.key()
            );
            return Err(PdError::NoMemory);
        }

        self.link(id, size_class, full);
        Ok(PdAllocation::cached(mem, offset, size_class.size()))
    }

    fn alloc_from_partial(
        &mut self,
        id: SlabId,
        size_class: SizeClass,
    ) -> PdResult<PdAllocation> {
        let Some(slab) = self.slabs.get_mut(id) else {
            error!("pd cache: partial list references a missing slab");
            return Err(PdError::NoMemory);
        };

        // Bitmap full while on the partial list. Something's wrong.
        let Some(index) = slab.claim_free_slot() else {
            error!(
                "pd cache: slab {:#x} on the partial list has no free slot",
                slab.mem().key()
            );
            return Err(PdError::NoMemory);
        };

        debug!("PD-Alloc [C]   Partial: offs={}", index);

        let mem = slab.mem();
        let offset = slab.slot_offset(index);
        if slab.is_full() {
            debug!("PD-Alloc [C]   Moving slab {:#x} to full list", mem.key());
            let class = size_class.to_index();
            self.partial[class].remove(&mut self.slabs, id);
            self.link(id, size_class, true);
        }

        Ok(PdAllocation::cached(mem, offset, size_class.size()))
    }

    /// Put `id` on the front of the partial or full list of its class.
    fn link(&mut self, id: SlabId, size_class: SizeClass, full: bool) {
        let class = size_class.to_index();
        let (list, state) = if full {
            (&mut self.full[class], PdSlabState::Full)
        } else {
            (&mut self.partial[class], PdSlabState::Partial)
        };
        list.push_front(&mut self.slabs, id);
        if let Some(slab) = self.slabs.get_mut(id) {
            slab.set_state(state);
        }
    }

    fn unlink(&mut self, id: SlabId) {
        let Some(slab) = self.slabs.get(id) else {
            return;
        };
        let class = slab.size_class().to_index();
        match slab.state() {
            PdSlabState::Partial => self.partial[class].remove(&mut self.slabs, id),
            PdSlabState::Full => self.full[class].remove(&mut self.slabs, id),
        }
    }

    /// Free a PD previously returned by [`PdCache::alloc`].
    ///
    /// Unknown blocks, misaligned offsets and double frees are reported as
    /// [`PdError::NotAllocated`] and leave the cache untouched.
    pub fn free<P: BlockProvider + ?Sized>(
        &mut self,
        provider: &P,
        pd: &PdAllocation,
    ) -> PdResult {
        debug!("PD-Free  [C] {:#x}+{:#x}", pd.mem().key(), pd.offset());

        let Some(id) = self.mem_tree.search(&pd.mem()) else {
            error!(
                "pd cache: attempting to free non-existent pd {:#x}+{:#x}",
                pd.mem().key(),
                pd.offset()
            );
            return Err(PdError::NotAllocated);
        };
        let Some(slab) = self.slabs.get_mut(id) else {
            error!("pd cache: mem tree references a missing slab");
            return Err(PdError::NotAllocated);
        };

        let size_class = slab.size_class();
        if size_class.size() != pd.size() {
            error!(
                "pd cache: freeing a {:#x} byte pd from a {:#x} byte slab",
                pd.size(),
                size_class.size()
            );
            return Err(PdError::NotAllocated);
        }

        let index = slab
            .slot_index_from_offset(pd.offset())
            .ok_or(PdError::NotAllocated)?;
        if !slab.release_slot(index) {
            error!(
                "pd cache: pd {:#x}+{:#x} is not allocated (double free?)",
                pd.mem().key(),
                pd.offset()
            );
            return Err(PdError::NotAllocated);
        }

        let empty = slab.is_empty();
        let was_full = slab.state() == PdSlabState::Full;
        if empty {
            self.release_slab(provider, id);
        } else if was_full {
            self.full[size_class.to_index()].remove(&mut self.slabs, id);
            self.link(id, size_class, false);
        }
        Ok(())
    }

    /// Drop an empty slab and give its page back.
    fn release_slab<P: BlockProvider + ?Sized>(&mut self, provider: &P, id: SlabId) {
        self.unlink(id);
        if let Some(slab) = self.slabs.remove(id) {
            let mem = slab.mem();
            self.mem_tree.remove(&mem);
            debug!("PD-Free  [C]   Releasing slab {:#x}", mem.key());
            provider.free_block(mem);
        }
    }

    /// True when no class holds any slab.
    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.mem_tree.len(), self.slabs.len());
        self.slabs.is_empty()
    }

    /// Report every class that still holds slabs.
    pub fn check_leaks(&self) -> PdResult {
        if self.is_empty() {
            return Ok(());
        }
        for (class, (partial, full)) in self.partial.iter().zip(self.full.iter()).enumerate() {
            if !partial.is_empty() || !full.is_empty() {
                error!(
                    "pd cache: {} byte class leaks {} partial and {} full slabs",
                    self.class_size(class),
                    partial.len(),
                    full.len()
                );
            }
        }
        Err(PdError::LeakDetected)
    }

    fn class_size(&self, class: usize) -> usize {
        SizeClass::from_index(&self.config, class).map_or(0, |class| class.size())
    }

    pub fn stats(&self) -> PdCacheStats {
        PdCacheStats {
            slabs: self.slabs.len(),
            partial_slabs: self.partial.iter().map(SlabList::len).sum(),
            full_slabs: self.full.iter().map(SlabList::len).sum(),
            pds_in_use: self.slabs.iter().map(|(_, slab)| slab.in_use()).sum(),
            backing_bytes: self.slabs.len() * self.config.page_size,
        }
    }

    pub fn snapshot(&self) -> PdCacheSnapshot {
        let members = |list: &SlabList| -> Vec<(BlockHandle, u64)> {
            list.iter(&self.slabs)
                .filter_map(|id| self.slabs.get(id))
                .map(|slab| (slab.mem(), slab.alloc_map().bits()))
                .collect()
        };

        let classes = self
            .partial
            .iter()
            .zip(self.full.iter())
            .enumerate()
            .map(|(class, (partial, full))| ClassSnapshot {
                size: self.class_size(class),
                partial: members(partial),
                full: members(full),
            })
            .collect();

        PdCacheSnapshot {
            classes,
            mem_tree: self.mem_tree.keys().collect(),
        }
    }
}
