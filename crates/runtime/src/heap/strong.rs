//! Long-lived strong roots.
//!
//! Module statics and runtime-owned singletons register here so the
//! collector can start its reachability pass from them. Entries are keyed by
//! a small monotonically assigned id; freed ids are recycled through a free
//! list, mirroring the chained-table-with-free-list layout of the heap's
//! other tables.

use hashbrown::HashMap;

use crate::heap::ObjRef;

/// Handle to a strong-root entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrongRef(u32);

#[derive(Debug)]
pub(crate) struct StrongTable {
    entries: HashMap<u32, ObjRef>,
    free_ids: Vec<u32>,
    next_id: u32,
}

impl StrongTable {
    pub fn new() -> Self {
        StrongTable {
            entries: HashMap::new(),
            free_ids: Vec::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, obj: ObjRef) -> StrongRef {
        let id = self.free_ids.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        self.entries.insert(id, obj);
        StrongRef(id)
    }

    pub fn get(&self, handle: StrongRef) -> Option<ObjRef> {
        self.entries.get(&handle.0).copied()
    }

    pub fn remove(&mut self, handle: StrongRef) -> Option<ObjRef> {
        let obj = self.entries.remove(&handle.0);
        if obj.is_some() {
            self.free_ids.push(handle.0);
        }
        obj
    }

    pub fn roots(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries.values().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
