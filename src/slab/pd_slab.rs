//! Slab block implementation.
//!
//! A `PdSlab` is one backing page divided into equal PD slots, with an
//! occupancy bitmap and its links in the owning cache's partial/full list.

#[cfg(feature = "log")]
use log::error;

use super::bitmap::PdBitmap;
use super::slab_list::SlabId;
use crate::size_class::SizeClass;
use crate::BlockHandle;

/// Which of its class's lists a slab currently sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdSlabState {
    Partial,
    Full,
}

#[derive(Debug)]
pub struct PdSlab {
    mem: BlockHandle,
    size_class: SizeClass,
    alloc_map: PdBitmap,
    state: PdSlabState,
    pub(super) prev: Option<SlabId>,
    pub(super) next: Option<SlabId>,
}

impl PdSlab {
    /// A slab over `mem` with no slots claimed yet.
    pub fn new(mem: BlockHandle, size_class: SizeClass) -> Self {
        Self {
            mem,
            size_class,
            alloc_map: PdBitmap::new(),
            state: PdSlabState::Partial,
            prev: None,
            next: None,
        }
    }

    pub fn mem(&self) -> BlockHandle {
        self.mem
    }

    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    pub fn alloc_map(&self) -> PdBitmap {
        self.alloc_map
    }

    pub fn state(&self) -> PdSlabState {
        self.state
    }

    pub(super) fn set_state(&mut self, state: PdSlabState) {
        self.state = state;
    }

    pub fn in_use(&self) -> usize {
        self.alloc_map.count()
    }

    pub fn is_full(&self) -> bool {
        let mask = self.size_class.full_mask();
        self.alloc_map.bits() & mask == mask
    }

    pub fn is_empty(&self) -> bool {
        self.alloc_map.is_empty()
    }

    /// Claim the lowest free slot. `None` means the bitmap is full, which a
    /// slab on a partial list must never be.
    pub fn claim_free_slot(&mut self) -> Option<usize> {
        let index = self
            .alloc_map
            .first_clear_bit(self.size_class.slots_per_block())?;
        self.alloc_map.set(index);
        Some(index)
    }

    /// Release slot `index`; returns false if it was not allocated.
    pub fn release_slot(&mut self, index: usize) -> bool {
        if index >= self.size_class.slots_per_block() || !self.alloc_map.test(index) {
            return false;
        }
        self.alloc_map.clear(index)
    }

    pub fn slot_offset(&self, index: usize) -> usize {
        index * self.size_class.size()
    }

    pub fn slot_index_from_offset(&self, offset: usize) -> Option<usize> {
        let size = self.size_class.size();
        if offset % size != 0 {
            error!(
                "pd slab {:#x}: offset {:#x} not aligned to {:#x} byte PDs",
                self.mem.key(),
                offset,
                size
            );
            return None;
        }

        let index = offset / size;
        if index < self.size_class.slots_per_block() {
            Some(index)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PdCacheConfig;

    fn slab(size: usize) -> PdSlab {
        let config = PdCacheConfig::new(4096, 256);
        let class = SizeClass::from_size(&config, size).unwrap();
        PdSlab::new(BlockHandle::new(0x1000, 4096), class)
    }

    #[test]
    fn test_pd_slab() {
        let mut slab = slab(1024);
        assert!(slab.is_empty());
        assert!(!slab.is_full());

        assert_eq!(slab.claim_free_slot(), Some(0));
        assert_eq!(slab.claim_free_slot(), Some(1));
        assert_eq!(slab.claim_free_slot(), Some(2));
        assert_eq!(slab.in_use(), 3);
        assert!(!slab.is_full());
        assert_eq!(slab.claim_free_slot(), Some(3));
        assert!(slab.is_full());
        assert_eq!(slab.claim_free_slot(), None);

        assert!(slab.release_slot(1));
        assert!(!slab.is_full());
        assert_eq!(slab.claim_free_slot(), Some(1));

        for index in 0..4 {
            assert!(slab.release_slot(index));
        }
        assert!(slab.is_empty());
    }

    #[test]
    fn test_release_unallocated_slot() {
        let mut slab = slab(2048);
        assert!(!slab.release_slot(0));
        assert_eq!(slab.claim_free_slot(), Some(0));
        assert!(!slab.release_slot(5));
        assert!(slab.release_slot(0));
        assert!(!slab.release_slot(0));
    }

    #[test]
    fn test_slot_index_from_offset() {
        let slab = slab(512);
        assert_eq!(slab.slot_offset(3), 1536);
        assert_eq!(slab.slot_index_from_offset(0), Some(0));
        assert_eq!(slab.slot_index_from_offset(1536), Some(3));
        assert_eq!(slab.slot_index_from_offset(1537), None);
        assert_eq!(slab.slot_index_from_offset(4096), None);
    }
}
