//! Size-class math for packed PDs.
//!
//! Class `i` holds PDs of `min_size << i` bytes; a backing page of class `i`
//! holds `page_size / (min_size << i)` of them.

use crate::config::PdCacheConfig;

/// Index of the class serving `size`, `log2(size / min_size)`.
///
/// `size` must be a power of two in `[min_size, page_size)`.
pub const fn class_index(config: &PdCacheConfig, size: usize) -> usize {
    (size.trailing_zeros() - config.min_size.trailing_zeros()) as usize
}

/// Occupancy pattern of a full slab of `slot_size` byte slots: the low
/// `page_size / slot_size` bits set.
///
/// The validated config keeps the slot count below the bitmap width.
pub const fn full_mask(config: &PdCacheConfig, slot_size: usize) -> u64 {
    let slots = config.page_size / slot_size;
    debug_assert!(slots < u64::BITS as usize);
    (1u64 << slots) - 1
}

/// One PD size class of a particular cache geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    index: usize,
    size: usize,
    slots: usize,
    mask: u64,
}

impl SizeClass {
    /// Select the class for a slab-path PD of `size` bytes.
    ///
    /// Returns `None` unless `size` is a power of two in
    /// `[min_size, page_size)`.
    pub fn from_size(config: &PdCacheConfig, size: usize) -> Option<Self> {
        if !size.is_power_of_two() || size < config.min_size || size >= config.page_size {
            return None;
        }
        Some(Self {
            index: class_index(config, size),
            size,
            slots: config.page_size / size,
            mask: full_mask(config, size),
        })
    }

    pub fn from_index(config: &PdCacheConfig, index: usize) -> Option<Self> {
        if index >= config.class_count() {
            return None;
        }
        Self::from_size(config, config.min_size << index)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn to_index(&self) -> usize {
        self.index
    }

    /// Number of PDs one backing page holds.
    pub fn slots_per_block(&self) -> usize {
        self.slots
    }

    /// Occupancy of a full slab of this class, see [`full_mask`].
    pub fn full_mask(&self) -> u64 {
        self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_index() {
        let config = PdCacheConfig::new(4096, 256);
        assert_eq!(class_index(&config, 256), 0);
        assert_eq!(class_index(&config, 512), 1);
        assert_eq!(class_index(&config, 1024), 2);
        assert_eq!(class_index(&config, 2048), 3);
    }

    #[test]
    fn test_full_mask() {
        let config = PdCacheConfig::new(4096, 256);
        assert_eq!(full_mask(&config, 256), 0xffff);
        assert_eq!(full_mask(&config, 512), 0xff);
        assert_eq!(full_mask(&config, 2048), 0b11);

        let config = PdCacheConfig::new(65536, 2048);
        assert_eq!(full_mask(&config, 2048), 0xffff_ffff);
    }

    #[test]
    fn test_size_class_boundaries() {
        let config = PdCacheConfig::new(4096, 256);
        assert_eq!(SizeClass::from_size(&config, 128), None);
        assert_eq!(SizeClass::from_size(&config, 3), None);
        assert_eq!(SizeClass::from_size(&config, 768), None);
        assert_eq!(SizeClass::from_size(&config, 4096), None);

        let class = SizeClass::from_size(&config, 256).unwrap();
        assert_eq!(class.to_index(), 0);
        assert_eq!(class.slots_per_block(), 16);
        assert_eq!(class.full_mask(), full_mask(&config, 256));

        let class = SizeClass::from_size(&config, 2048).unwrap();
        assert_eq!(class.to_index(), 3);
        assert_eq!(class.slots_per_block(), 2);
        assert_eq!(class.full_mask(), 0b11);
    }

    #[test]
    fn test_from_index() {
        let config = PdCacheConfig::new(4096, 256);
        for index in 0..config.class_count() {
            let class = SizeClass::from_index(&config, index).unwrap();
            assert_eq!(class.to_index(), index);
            assert_eq!(class.size(), 256 << index);
        }
        assert_eq!(SizeClass::from_index(&config, 4), None);
    }
}
