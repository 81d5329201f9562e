//! The large-object table.
//!
//! Allocations too big for the largest size class land here: a fixed array
//! of buckets chained by insertion, indexed by a hash of the object's id.
//! Bucket count is fixed at construction; chains simply grow under load.

use xxhash_rust::xxh3::xxh3_64;

use crate::heap::cluster::{GcFlags, SlotHeader};
use crate::object::HeapObject;

/// One large allocation: a slot header plus its payload.
#[derive(Debug)]
pub(crate) struct LargeSlot {
    pub id: u32,
    pub header: SlotHeader,
    pub object: HeapObject,
}

#[derive(Debug)]
pub(crate) struct LargeTable {
    buckets: Vec<Vec<LargeSlot>>,
    mask: u64,
    next_id: u32,
    live: usize,
}

fn bucket_of(id: u32, mask: u64) -> usize {
    (xxh3_64(&id.to_le_bytes()) & mask) as usize
}

impl LargeTable {
    /// `bucket_count` must be a power of two.
    pub fn new(bucket_count: usize) -> Self {
        debug_assert!(bucket_count.is_power_of_two());
        LargeTable {
            buckets: (0..bucket_count).map(|_| Vec::new()).collect(),
            mask: (bucket_count - 1) as u64,
            next_id: 1,
            live: 0,
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Installs `object` with an initial reference count of 1 and returns
    /// its table id.
    pub fn alloc(&mut self, object: HeapObject) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let slot = LargeSlot {
            id,
            header: SlotHeader {
                ref_count: 1,
                prev: None,
                next: None,
                flags: GcFlags::empty(),
            },
            object,
        };
        let b = bucket_of(id, self.mask);
        self.buckets[b].push(slot);
        self.live += 1;
        id
    }

    pub fn get(&self, id: u32) -> Option<&LargeSlot> {
        let b = bucket_of(id, self.mask);
        self.buckets[b].iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut LargeSlot> {
        let b = bucket_of(id, self.mask);
        self.buckets[b].iter_mut().find(|s| s.id == id)
    }

    /// Removes the slot and returns its payload.
    pub fn detach(&mut self, id: u32) -> Option<HeapObject> {
        let b = bucket_of(id, self.mask);
        let pos = self.buckets[b].iter().position(|s| s.id == id)?;
        let slot = self.buckets[b].swap_remove(pos);
        self.live -= 1;
        Some(slot.object)
    }

    /// Every live id, in no particular order.
    pub fn ids(&self) -> Vec<u32> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|s| s.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::test_support::plain_object;

    #[test]
    fn test_alloc_get_detach() {
        let mut table = LargeTable::new(16);
        let a = table.alloc(plain_object());
        let b = table.alloc(plain_object());
        assert_ne!(a, b);
        assert_eq!(table.live(), 2);
        assert!(table.get(a).is_some());
        assert!(table.detach(a).is_some());
        assert!(table.get(a).is_none());
        assert!(table.detach(a).is_none());
        assert_eq!(table.live(), 1);
    }
}
