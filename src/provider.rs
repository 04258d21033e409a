//! Block provider backed by the global allocator.
//!
//! Useful when PD memory is ordinary kernel memory (e.g. behind an IOMMU, or
//! in a simulator). Blocks are zeroed and aligned to the page size; the
//! block key is its virtual address.

use alloc::collections::BTreeMap;
use core::alloc::Layout;

use kspin::SpinNoIrq;
#[cfg(feature = "log")]
use log::{error, warn};

use crate::{align_up, BlockHandle, BlockProvider, PdError, PdResult, DEFAULT_PAGE_SIZE};

pub struct HeapBlockProvider<const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    /// Key -> requested size of every block handed out and not yet freed.
    /// Only handles found here are ever passed back to the global allocator.
    live: SpinNoIrq<BTreeMap<u64, usize>>,
}

impl<const PAGE_SIZE: usize> HeapBlockProvider<PAGE_SIZE> {
    pub const fn new() -> Self {
        Self {
            live: SpinNoIrq::new(BTreeMap::new()),
        }
    }

    /// Number of blocks handed out and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.live.lock().len()
    }

    fn layout(size: usize) -> PdResult<Layout> {
        Layout::from_size_align(align_up(size, PAGE_SIZE), PAGE_SIZE)
            .map_err(|_| PdError::InvalidParam)
    }
}

impl<const PAGE_SIZE: usize> Default for HeapBlockProvider<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> BlockProvider for HeapBlockProvider<PAGE_SIZE> {
    /// Heap memory is only virtually contiguous; `contiguous` is accepted
    /// but cannot be honoured beyond that.
    fn alloc_block(&self, size: usize, _contiguous: bool) -> PdResult<BlockHandle> {
        if size == 0 {
            return Err(PdError::InvalidParam);
        }
        let layout = Self::layout(size)?;
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            warn!("heap block provider: out of memory for {:#x} bytes", size);
            return Err(PdError::NoMemory);
        }
        let key = ptr as usize as u64;
        self.live.lock().insert(key, size);
        Ok(BlockHandle::new(key, size))
    }

    /// Unknown handles, double frees and size mismatches are logged and
    /// ignored.
    fn free_block(&self, block: BlockHandle) {
        let mut live = self.live.lock();
        match live.get(&block.key()) {
            Some(&size) if size == block.size() => {}
            Some(&size) => {
                error!(
                    "heap block provider: block {:#x} freed with size {:#x}, allocated as {:#x}",
                    block.key(),
                    block.size(),
                    size
                );
                return;
            }
            None => {
                error!(
                    "heap block provider: block {:#x} was not allocated here",
                    block.key()
                );
                return;
            }
        }
        let layout = match Self::layout(block.size()) {
            Ok(layout) => layout,
            Err(_) => {
                error!(
                    "heap block provider: invalid layout for block {:#x} ({:#x} bytes)",
                    block.key(),
                    block.size()
                );
                return;
            }
        };
        live.remove(&block.key());
        // SAFETY: the key is a live pointer from `alloc_block`, and the size
        // matches the one it was allocated with, so the layout is identical.
        unsafe { alloc::alloc::dealloc(block.key() as usize as *mut u8, layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test]
    fn test_heap_blocks_are_page_aligned_and_zeroed() {
        let provider = HeapBlockProvider::<0x1000>::new();

        let block = provider.alloc_block(0x1000, true).unwrap();
        assert_eq!(block.key() & 0xfff, 0);
        assert_eq!(block.size(), 0x1000);
        let ptr = block.key() as usize as *const u8;
        let bytes = unsafe { core::slice::from_raw_parts(ptr, 0x1000) };
        assert!(bytes.iter().all(|&b| b == 0));

        let odd = provider.alloc_block(0x1800, false).unwrap();
        assert_eq!(odd.key() & 0xfff, 0);
        assert_eq!(provider.outstanding(), 2);

        provider.free_block(block);
        provider.free_block(odd);
        assert_eq!(provider.outstanding(), 0);
    }

    #[test]
    fn test_zero_sized_block() {
        let provider = HeapBlockProvider::<0x1000>::new();
        assert_eq!(provider.alloc_block(0, true), Err(PdError::InvalidParam));
    }

    #[test]
    fn test_free_foreign_block() {
        let provider = HeapBlockProvider::<0x1000>::new();
        let block = provider.alloc_block(0x1000, true).unwrap();

        // memory this provider never handed out
        let foreign = Box::into_raw(Box::new([0u8; 64]));
        provider.free_block(BlockHandle::new(foreign as usize as u64, 0x1000));
        assert_eq!(provider.outstanding(), 1);
        drop(unsafe { Box::from_raw(foreign) });

        // right key, wrong size
        provider.free_block(BlockHandle::new(block.key(), 0x2000));
        assert_eq!(provider.outstanding(), 1);

        provider.free_block(block);
        assert_eq!(provider.outstanding(), 0);

        // double free
        provider.free_block(block);
        assert_eq!(provider.outstanding(), 0);
    }
}
