//! Fixed-width occupancy bitmap for one slab.

/// One bit per slot; a set bit means the slot is allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdBitmap(u64);

impl PdBitmap {
    pub const BITS: usize = u64::BITS as usize;

    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn test(&self, index: usize) -> bool {
        index < Self::BITS && self.0 & (1u64 << index) != 0
    }

    /// Lowest clear bit below `width`, if any.
    pub fn first_clear_bit(&self, width: usize) -> Option<usize> {
        let index = (!self.0).trailing_zeros() as usize;
        if index < width.min(Self::BITS) {
            Some(index)
        } else {
            None
        }
    }

    /// Set `index`; returns false if it was already set.
    pub fn set(&mut self, index: usize) -> bool {
        debug_assert!(index < Self::BITS);
        let mask = 1u64 << index;
        let was_clear = self.0 & mask == 0;
        self.0 |= mask;
        was_clear
    }

    /// Clear `index`; returns false if it was already clear.
    pub fn clear(&mut self, index: usize) -> bool {
        debug_assert!(index < Self::BITS);
        let mask = 1u64 << index;
        let was_set = self.0 & mask != 0;
        self.0 &= !mask;
        was_set
    }

    pub const fn count(&self) -> usize {
        self.0.count_ones() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_clear_bit() {
        let mut map = PdBitmap::new();
        assert_eq!(map.first_clear_bit(16), Some(0));

        map.set(0);
        map.set(1);
        map.set(3);
        assert_eq!(map.first_clear_bit(16), Some(2));
        assert_eq!(map.first_clear_bit(2), None);

        let full = PdBitmap(u64::MAX);
        assert_eq!(full.first_clear_bit(PdBitmap::BITS), None);
    }

    #[test]
    fn test_set_clear() {
        let mut map = PdBitmap::new();
        assert!(map.set(5));
        assert!(!map.set(5));
        assert!(map.test(5));
        assert_eq!(map.count(), 1);

        assert!(map.clear(5));
        assert!(!map.clear(5));
        assert!(map.is_empty());
        assert!(!map.test(64));
    }
}
