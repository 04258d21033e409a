//! Direct path for PDs that are not packed.
//!
//! Page-sized and larger PDs, and PDs that must start on their own page (the
//! top level PDB), get a dedicated backing block. Nothing here touches the
//! cache or its lock.

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::config::PdCacheConfig;
use crate::pd_allocator::PdAllocation;
use crate::{BlockProvider, PdError, PdResult};

/// Allocate a dedicated `bytes` sized block for one PD.
pub fn alloc_direct<P: BlockProvider + ?Sized>(
    provider: &P,
    config: &PdCacheConfig,
    bytes: usize,
) -> PdResult<PdAllocation> {
    debug!("PD-Alloc [D] {} bytes", bytes);

    if bytes == 0 {
        return Err(PdError::InvalidParam);
    }

    let mem = provider
        .alloc_block(bytes, config.force_contiguous())
        .map_err(|_| {
            warn!("PD-Alloc [D] OOM allocating page directory!");
            PdError::NoMemory
        })?;

    Ok(PdAllocation::direct(mem, bytes))
}

/// Return a direct PD's block to the provider.
pub fn free_direct<P: BlockProvider + ?Sized>(provider: &P, pd: PdAllocation) {
    debug!("PD-Free  [D] {:#x}", pd.mem().key());
    debug_assert!(!pd.is_cached());
    provider.free_block(pd.mem());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockHandle;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingProvider {
        last_size: AtomicUsize,
        last_contiguous: AtomicBool,
        freed: AtomicUsize,
    }

    impl BlockProvider for RecordingProvider {
        fn alloc_block(&self, size: usize, contiguous: bool) -> PdResult<BlockHandle> {
            self.last_size.store(size, Ordering::SeqCst);
            self.last_contiguous.store(contiguous, Ordering::SeqCst);
            Ok(BlockHandle::new(0x40_0000, size))
        }

        fn free_block(&self, block: BlockHandle) {
            assert_eq!(block.key(), 0x40_0000);
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_direct_round_trip() {
        let provider = RecordingProvider::default();
        let config = PdCacheConfig::default();

        let pd = alloc_direct(&provider, &config, 8192).unwrap();
        assert!(!pd.is_cached());
        assert_eq!(pd.offset(), 0);
        assert_eq!(pd.size(), 8192);
        assert_eq!(provider.last_size.load(Ordering::SeqCst), 8192);
        assert!(provider.last_contiguous.load(Ordering::SeqCst));

        free_direct(&provider, pd);
        assert_eq!(provider.freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_direct_iommu_not_contiguous() {
        let provider = RecordingProvider::default();
        let config = PdCacheConfig::default().with_iommu(true);

        let pd = alloc_direct(&provider, &config, 4096).unwrap();
        assert!(!provider.last_contiguous.load(Ordering::SeqCst));
        free_direct(&provider, pd);
    }

    #[test]
    fn test_direct_zero_bytes() {
        let provider = RecordingProvider::default();
        let config = PdCacheConfig::default();
        assert_eq!(
            alloc_direct(&provider, &config, 0).unwrap_err(),
            PdError::InvalidParam
        );
    }
}
