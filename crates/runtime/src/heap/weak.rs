//! Weak references.
//!
//! A weak entry is a non-owning back-reference to a live object, stored in a
//! two-level table keyed by the object's identity hash: an outer bucket from
//! the high hash bits, an inner bucket from the low bits, then a short chain.
//! At most one entry exists per object; repeated `make_weak` calls bump the
//! entry's counter. Entries are cleared synchronously when the referent is
//! destroyed, so a lookup through a cleared handle yields nothing.

use xxhash_rust::xxh3::xxh3_64;

use crate::heap::ObjRef;

/// A weak handle. Resolving it re-reads the table, so it never prolongs the
/// referent's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakRef(pub(crate) ObjRef);

#[derive(Debug)]
struct WeakEntry {
    referent: ObjRef,
    weak_count: u32,
}

#[derive(Debug)]
pub(crate) struct WeakTable {
    outer: Vec<Option<Box<InnerBucket>>>,
    outer_mask: u64,
    inner_mask: u64,
    live: usize,
}

#[derive(Debug)]
struct InnerBucket {
    chains: Vec<Vec<WeakEntry>>,
}

fn identity(obj: ObjRef) -> u64 {
    xxh3_64(&obj.raw().to_le_bytes())
}

impl WeakTable {
    /// Both levels are fixed power-of-two sizes; no resizing under load.
    pub fn new(outer_count: usize, inner_count: usize) -> Self {
        debug_assert!(outer_count.is_power_of_two() && inner_count.is_power_of_two());
        WeakTable {
            outer: (0..outer_count).map(|_| None).collect(),
            outer_mask: (outer_count - 1) as u64,
            inner_mask: (inner_count - 1) as u64,
            live: 0,
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    fn slots_of(&self, obj: ObjRef) -> (usize, usize) {
        let h = identity(obj);
        let outer = ((h >> 16) & self.outer_mask) as usize;
        let inner = (h & self.inner_mask) as usize;
        (outer, inner)
    }

    /// Installs (or re-references) the weak entry for `obj`. Returns true if
    /// a new entry was created, meaning the caller must set the object's
    /// weak bit.
    pub fn make(&mut self, obj: ObjRef) -> bool {
        let (oi, ii) = self.slots_of(obj);
        let inner_count = self.inner_mask as usize + 1;
        let bucket = self.outer[oi].get_or_insert_with(|| {
            Box::new(InnerBucket {
                chains: (0..inner_count).map(|_| Vec::new()).collect(),
            })
        });
        let chain = &mut bucket.chains[ii];
        if let Some(entry) = chain.iter_mut().find(|e| e.referent == obj) {
            entry.weak_count += 1;
            return false;
        }
        chain.push(WeakEntry {
            referent: obj,
            weak_count: 1,
        });
        self.live += 1;
        true
    }

    /// Resolves a weak handle to the referent, or None once cleared.
    pub fn get(&self, weak: WeakRef) -> Option<ObjRef> {
        let (oi, ii) = self.slots_of(weak.0);
        let bucket = self.outer[oi].as_ref()?;
        bucket.chains[ii]
            .iter()
            .find(|e| e.referent == weak.0)
            .map(|e| e.referent)
    }

    /// Drops one weak reference. Returns true if the entry was removed,
    /// meaning the caller must clear the object's weak bit.
    pub fn release(&mut self, weak: WeakRef) -> bool {
        let (oi, ii) = self.slots_of(weak.0);
        let Some(bucket) = self.outer[oi].as_mut() else {
            return false;
        };
        let chain = &mut bucket.chains[ii];
        let Some(pos) = chain.iter().position(|e| e.referent == weak.0) else {
            return false;
        };
        if chain[pos].weak_count > 1 {
            chain[pos].weak_count -= 1;
            return false;
        }
        chain.remove(pos);
        self.live -= 1;
        true
    }

    /// Removes the entry for a destroyed object, whatever its weak count.
    pub fn clear(&mut self, obj: ObjRef) {
        let (oi, ii) = self.slots_of(obj);
        let Some(bucket) = self.outer[oi].as_mut() else {
            return;
        };
        let chain = &mut bucket.chains[ii];
        if let Some(pos) = chain.iter().position(|e| e.referent == obj) {
            chain.remove(pos);
            self.live -= 1;
        }
    }
}
