//! Cache configuration.

#[cfg(feature = "log")]
use log::error;

use crate::slab::bitmap::PdBitmap;
use crate::{PdError, PdResult, DEFAULT_MIN_PD_SIZE, DEFAULT_PAGE_SIZE};

/// Geometry of a PD cache and how it asks for backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdCacheConfig {
    /// Size of one backing block. PDs this size or larger take the direct path.
    pub page_size: usize,
    /// Smallest PD the cache hands out.
    pub min_size: usize,
    /// Device sits behind an IOMMU, so backing memory need not be physically
    /// contiguous.
    pub iommuable: bool,
}

impl PdCacheConfig {
    pub const DEFAULT: Self = Self::new(DEFAULT_PAGE_SIZE, DEFAULT_MIN_PD_SIZE);

    pub const fn new(page_size: usize, min_size: usize) -> Self {
        Self {
            page_size,
            min_size,
            iommuable: false,
        }
    }

    pub const fn with_iommu(mut self, iommuable: bool) -> Self {
        self.iommuable = iommuable;
        self
    }

    /// Whether provider requests must ask for physically contiguous memory.
    pub const fn force_contiguous(&self) -> bool {
        !self.iommuable
    }

    /// Most slots any slab of this geometry can hold.
    pub const fn max_slots_per_block(&self) -> usize {
        self.page_size / self.min_size
    }

    /// Number of size classes, `log2(page_size / min_size)`.
    pub const fn class_count(&self) -> usize {
        self.max_slots_per_block().trailing_zeros() as usize
    }

    /// Check the geometry. Every slab's occupancy must fit strictly inside
    /// the bitmap word, so the full mask never needs a full-width shift.
    pub fn validate(&self) -> PdResult {
        if !self.page_size.is_power_of_two() || !self.min_size.is_power_of_two() {
            error!(
                "pd cache: page size {:#x} and min size {:#x} must be powers of two",
                self.page_size, self.min_size
            );
            return Err(PdError::InvalidParam);
        }
        if self.min_size >= self.page_size {
            error!(
                "pd cache: min size {:#x} must be below page size {:#x}",
                self.min_size, self.page_size
            );
            return Err(PdError::InvalidParam);
        }
        if self.max_slots_per_block() >= PdBitmap::BITS {
            error!(
                "pd cache: {} slots per page exceed the {}-bit occupancy map",
                self.max_slots_per_block(),
                PdBitmap::BITS
            );
            return Err(PdError::InvalidParam);
        }
        Ok(())
    }
}

impl Default for PdCacheConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
