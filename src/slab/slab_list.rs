//! Slab storage and the partial/full lists threaded through it.
//!
//! Slabs live in a `SlabArena` and are referred to by `SlabId`. A `SlabList`
//! links slabs through the `prev`/`next` ids stored in each slab, so moving a
//! slab between lists never allocates.

use alloc::vec::Vec;

use super::pd_slab::PdSlab;

/// Stable index of a slab inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlabId(usize);

#[derive(Default)]
pub struct SlabArena {
    entries: Vec<Option<PdSlab>>,
    vacant: Vec<usize>,
    len: usize,
}

impl SlabArena {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            vacant: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, slab: PdSlab) -> SlabId {
        self.len += 1;
        if let Some(index) = self.vacant.pop() {
            self.entries[index] = Some(slab);
            return SlabId(index);
        }
        self.entries.push(Some(slab));
        SlabId(self.entries.len() - 1)
    }

    pub fn remove(&mut self, id: SlabId) -> Option<PdSlab> {
        let slab = self.entries.get_mut(id.0)?.take()?;
        self.vacant.push(id.0);
        self.len -= 1;
        Some(slab)
    }

    pub fn get(&self, id: SlabId) -> Option<&PdSlab> {
        self.entries.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: SlabId) -> Option<&mut PdSlab> {
        self.entries.get_mut(id.0)?.as_mut()
    }

    /// Every live slab, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (SlabId, &PdSlab)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, slab)| slab.as_ref().map(|slab| (SlabId(index), slab)))
    }
}

pub struct SlabList {
    head: Option<SlabId>,
    tail: Option<SlabId>,
    len: usize,
}

impl SlabList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn front(&self) -> Option<SlabId> {
        self.head
    }

    pub fn push_front(&mut self, arena: &mut SlabArena, id: SlabId) {
        let old_head = self.head;
        if let Some(slab) = arena.get_mut(id) {
            slab.prev = None;
            slab.next = old_head;
        }

        if let Some(head) = old_head.and_then(|head| arena.get_mut(head)) {
            head.prev = Some(id);
        } else {
            self.tail = Some(id);
        }

        self.head = Some(id);
        self.len += 1;
    }

    pub fn remove(&mut self, arena: &mut SlabArena, id: SlabId) {
        let (prev, next) = match arena.get_mut(id) {
            Some(slab) => (slab.prev.take(), slab.next.take()),
            None => return,
        };

        if let Some(prev_slab) = prev.and_then(|prev| arena.get_mut(prev)) {
            prev_slab.next = next;
        } else {
            self.head = next;
        }

        if let Some(next_slab) = next.and_then(|next| arena.get_mut(next)) {
            next_slab.prev = prev;
        } else {
            self.tail = prev;
        }

        self.len = self.len.saturating_sub(1);
    }

    /// Ids from front to back.
    pub fn iter<'a>(&self, arena: &'a SlabArena) -> impl Iterator<Item = SlabId> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let id = cursor?;
            cursor = arena.get(id).and_then(|slab| slab.next);
            Some(id)
        })
    }
}
