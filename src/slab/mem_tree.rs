//! Reverse lookup from backing block to the slab carved out of it.

use alloc::collections::BTreeMap;

use super::slab_list::SlabId;
use crate::BlockHandle;

pub struct MemTree {
    tree: BTreeMap<BlockHandle, SlabId>,
}

impl MemTree {
    pub const fn new() -> Self {
        Self {
            tree: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns false, leaving the tree unchanged, if `mem` is already present.
    pub fn insert(&mut self, mem: BlockHandle, id: SlabId) -> bool {
        if self.tree.contains_key(&mem) {
            return false;
        }
        self.tree.insert(mem, id);
        true
    }

    pub fn remove(&mut self, mem: &BlockHandle) -> Option<SlabId> {
        self.tree.remove(mem)
    }

    pub fn search(&self, mem: &BlockHandle) -> Option<SlabId> {
        self.tree.get(mem).copied()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = BlockHandle> + '_ {
        self.tree.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::slab_list::SlabArena;
    use super::super::pd_slab::PdSlab;
    use crate::config::PdCacheConfig;
    use crate::size_class::SizeClass;
    use alloc::vec::Vec;

    #[test]
    fn test_insert_search_remove() {
        let config = PdCacheConfig::default();
        let class = SizeClass::from_size(&config, 512).unwrap();
        let mut arena = SlabArena::new();
        let mut tree = MemTree::new();

        let high = BlockHandle::new(0x9000, 4096);
        let low = BlockHandle::new(0x2000, 4096);
        let high_id = arena.insert(PdSlab::new(high, class));
        let low_id = arena.insert(PdSlab::new(low, class));

        assert!(tree.insert(high, high_id));
        assert!(tree.insert(low, low_id));
        assert!(!tree.insert(low, high_id));
        assert_eq!(tree.len(), 2);

        assert_eq!(tree.search(&low), Some(low_id));
        assert_eq!(tree.search(&BlockHandle::new(0x5000, 4096)), None);
        assert_eq!(tree.keys().collect::<Vec<_>>(), [low, high]);

        assert_eq!(tree.remove(&high), Some(high_id));
        assert_eq!(tree.remove(&high), None);
        assert_eq!(tree.search(&high), None);
        assert_eq!(tree.len(), 1);
    }
}
