//! Slab allocator for subtree nodes.
//!
//! Subtree lifetimes are short-to-medium and bursty; recycling fixed-size
//! slots through slab bitmaps keeps allocation off the hot path. Each slab
//! holds [`SLAB_LEN`] slots and a one-bit-per-slot occupancy word.

use super::SubtreeData;

pub(super) const SLAB_LEN: usize = 64;

/// Index of a subtree slot: `slab * SLAB_LEN + slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubtreeId(pub(crate) u32);

struct Slab {
    occupancy: u64,
    slots: Vec<SubtreeData>,
}

impl Slab {
    fn new() -> Self {
        Self {
            occupancy: 0,
            slots: (0..SLAB_LEN).map(|_| SubtreeData::default()).collect(),
        }
    }

    fn is_full(&self) -> bool {
        self.occupancy == u64::MAX
    }
}

/// The arena all subtrees live in. Tree construction, reference counting,
/// and traversal are implemented as methods on this type (see `tree/mod.rs`).
pub struct SubtreePool {
    slabs: Vec<Slab>,
    first_available: usize,
}

impl SubtreePool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slabs: vec![Slab::new()],
            first_available: 0,
        }
    }

    /// Claim a fresh slot. The slot's data is default-initialized with a
    /// reference count of 1.
    pub(crate) fn allocate(&mut self) -> SubtreeId {
        let slab_index = self.first_available;
        let slab = &mut self.slabs[slab_index];
        let slot = (!slab.occupancy).trailing_zeros() as usize;
        slab.occupancy |= 1 << slot;
        slab.slots[slot].ref_count = 1;

        if slab.is_full() {
            match (slab_index + 1..self.slabs.len()).find(|&i| !self.slabs[i].is_full()) {
                Some(next) => self.first_available = next,
                None => {
                    self.first_available = self.slabs.len();
                    self.slabs.push(Slab::new());
                }
            }
        }

        SubtreeId((slab_index * SLAB_LEN + slot) as u32)
    }

    /// Return a slot to its slab, dropping any owned payload.
    pub(crate) fn free_slot(&mut self, id: SubtreeId) {
        let slab_index = id.0 as usize / SLAB_LEN;
        let slot = id.0 as usize % SLAB_LEN;
        let slab = &mut self.slabs[slab_index];
        debug_assert!(slab.occupancy & (1 << slot) != 0, "double free of subtree slot");
        slab.occupancy &= !(1 << slot);
        slab.slots[slot] = SubtreeData::default();
        if slab_index < self.first_available {
            self.first_available = slab_index;
        }
    }

    #[must_use]
    pub fn get(&self, id: SubtreeId) -> &SubtreeData {
        let slab = &self.slabs[id.0 as usize / SLAB_LEN];
        debug_assert!(slab.occupancy & (1 << (id.0 as usize % SLAB_LEN)) != 0);
        &slab.slots[id.0 as usize % SLAB_LEN]
    }

    pub(crate) fn get_mut(&mut self, id: SubtreeId) -> &mut SubtreeData {
        let slab = &mut self.slabs[id.0 as usize / SLAB_LEN];
        debug_assert!(slab.occupancy & (1 << (id.0 as usize % SLAB_LEN)) != 0);
        &mut slab.slots[id.0 as usize % SLAB_LEN]
    }

    /// Number of occupied slots. Zero once every tree has been released.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slabs
            .iter()
            .map(|slab| slab.occupancy.count_ones() as usize)
            .sum()
    }
}

impl Default for SubtreePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_fills_slabs_in_order() {
        let mut pool = SubtreePool::new();
        let ids: Vec<_> = (0..SLAB_LEN + 1).map(|_| pool.allocate()).collect();
        assert_eq!(ids[0].0, 0);
        assert_eq!(ids[SLAB_LEN].0 as usize, SLAB_LEN);
        assert_eq!(pool.live_count(), SLAB_LEN + 1);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut pool = SubtreePool::new();
        let a = pool.allocate();
        let _b = pool.allocate();
        pool.free_slot(a);
        let c = pool.allocate();
        assert_eq!(a, c);
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn cursor_moves_back_on_free() {
        let mut pool = SubtreePool::new();
        let ids: Vec<_> = (0..2 * SLAB_LEN).map(|_| pool.allocate()).collect();
        pool.free_slot(ids[3]);
        let again = pool.allocate();
        assert_eq!(again, ids[3]);
        for id in ids.iter().filter(|&&id| id != ids[3]) {
            pool.free_slot(*id);
        }
        pool.free_slot(again);
        assert_eq!(pool.live_count(), 0);
    }
}
