//! Table: the open-addressing core.
//!
//! Owns the slot store and the cursor registry and knows nothing about
//! hashing keys: callers pass the hash in, and rehashing reuses the hashes
//! cached in the store. `FlashMap` layers the hasher and the public API on
//! top.

use crate::error::AllocError;
use crate::probe::{self, Probe};
use crate::registry::{CursorKey, Node, Registry};
use crate::slot_store::{SlotStore, Tag};
use core::cell::RefCell;
use std::rc::Rc;

/// Capacity used by `FlashMap::new`.
pub const DEFAULT_CAPACITY: usize = 1024;
/// Load factor numerator; growth triggers above `capacity * 7 / 8` entries.
pub const LOAD_FACTOR_NUM: usize = 7;
/// Load factor denominator.
pub const LOAD_FACTOR_DEN: usize = 8;

/// `floor(capacity * 7 / 8)` without overflowing.
pub(crate) fn max_load_for(capacity: usize) -> usize {
    capacity / LOAD_FACTOR_DEN * LOAD_FACTOR_NUM
        + capacity % LOAD_FACTOR_DEN * LOAD_FACTOR_NUM / LOAD_FACTOR_DEN
}

pub(crate) fn round_capacity(requested: usize) -> usize {
    requested
        .max(1)
        .checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

pub(crate) struct Table<K, V> {
    pub(crate) store: SlotStore<K, V>,
    count: usize,
    tombstones: usize,
    // Slots still tagged `Free`; a miss only terminates early on one of these.
    free: usize,
    max_load: usize,
    pub(crate) registry: Rc<RefCell<Registry>>,
}

impl<K, V> Table<K, V> {
    pub fn new(requested: usize) -> Self {
        let capacity = round_capacity(requested);
        Self {
            store: SlotStore::new(capacity),
            count: 0,
            tombstones: 0,
            free: capacity,
            max_load: max_load_for(capacity),
            registry: Rc::new(RefCell::new(Registry::new(capacity))),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.len()
    }

    pub fn max_load(&self) -> usize {
        self.max_load
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    pub fn live_cursors(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn find(&self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<usize> {
        probe::lookup(&self.store, hash, eq)
    }

    pub fn value_mut(&mut self, i: usize) -> Option<&mut V> {
        self.store.entry_mut(i).map(|(_, v)| v)
    }

    /// Locate `hash`/`eq` for insertion, growing first if a new entry would
    /// push the table past its load limit or no `Free` slot is left.
    pub fn prepare_insert(
        &mut self,
        hash: u64,
        mut eq: impl FnMut(&K) -> bool,
    ) -> Result<Probe, AllocError> {
        loop {
            match probe::insert_position(&self.store, hash, &mut eq) {
                Some(found @ Probe::Found(_)) => return Ok(found),
                Some(vacant @ Probe::Vacant(_))
                    if self.count < self.max_load && self.free > 0 =>
                {
                    return Ok(vacant)
                }
                _ => self.rehash()?,
            }
        }
    }

    /// Fill slot `i` as chosen by `prepare_insert`.
    pub fn occupy(&mut self, i: usize, hash: u64, key: K, value: V) -> &mut V {
        match self.store.tag(i) {
            Tag::Deleted => self.tombstones -= 1,
            Tag::Free => self.free -= 1,
            Tag::Occupied => {}
        }
        self.count += 1;
        self.store.occupy(i, hash, key, value)
    }

    /// Tombstone slot `i` and flag the cursors sitting on it.
    pub fn erase_slot(&mut self, i: usize) -> Option<(K, V)> {
        if i >= self.capacity() {
            return None;
        }
        let entry = self.store.take(i)?;
        self.count -= 1;
        self.tombstones += 1;
        self.registry.borrow_mut().mark_erased(i);
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.store.reset();
        self.count = 0;
        self.tombstones = 0;
        self.free = self.capacity();
        let invalidated = self.registry.borrow_mut().invalidate_all();
        tracing::debug!(
            capacity = self.capacity(),
            invalidated_cursors = invalidated,
            "FlashMap cleared"
        );
    }

    pub fn first_occupied(&self) -> usize {
        self.store.next_occupied(0)
    }

    pub fn register(&self, index: usize) -> Result<CursorKey, AllocError> {
        self.registry.borrow_mut().register(Node {
            index,
            erased: false,
        })
    }

    /// Double the capacity.
    ///
    /// Entries under live cursors move first, so each cursor is pointed at its
    /// entry's new slot; everything else is swept over afterwards in physical
    /// order. Tombstones are not carried over.
    pub fn rehash(&mut self) -> Result<(), AllocError> {
        let old_capacity = self.capacity();
        let new_capacity = old_capacity.checked_mul(2).ok_or(AllocError)?;
        let mut fresh = SlotStore::try_new(new_capacity)?;
        let old = &mut self.store;

        let relocated = self.registry.borrow_mut().relocate(new_capacity, |i| {
            if i >= old.len() {
                return None;
            }
            let hash = old.hash(i);
            let (key, value) = old.take(i)?;
            Some(place(&mut fresh, hash, key, value))
        });

        for i in 0..old_capacity {
            if old.tag(i) != Tag::Occupied {
                continue;
            }
            let hash = old.hash(i);
            if let Some((key, value)) = old.take(i) {
                place(&mut fresh, hash, key, value);
            }
        }

        self.store = fresh;
        self.max_load = max_load_for(new_capacity);
        self.tombstones = 0;
        self.free = new_capacity - self.count;
        tracing::debug!(
            old_capacity,
            new_capacity,
            entries = self.count,
            relocated_cursors = relocated,
            "FlashMap rehashed"
        );
        Ok(())
    }
}

/// Put an entry into a store that has no tombstones and room to spare.
fn place<K, V>(store: &mut SlotStore<K, V>, hash: u64, key: K, value: V) -> usize {
    let i = match probe::insert_position(store, hash, |_| false) {
        Some(Probe::Vacant(i)) | Some(Probe::Found(i)) => i,
        None => unreachable!("rehash target must have a free slot for every entry"),
    };
    store.occupy(i, hash, key, value);
    i
}

impl<K: Clone, V: Clone> Clone for Table<K, V> {
    /// Copies the slots; the copy starts with no cursors of its own.
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            count: self.count,
            tombstones: self.tombstones,
            free: self.free,
            max_load: self.max_load,
            registry: Rc::new(RefCell::new(Registry::new(self.capacity()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(t: &mut Table<u64, u64>, k: u64, v: u64) -> bool {
        match t.prepare_insert(k, |x| *x == k).unwrap() {
            Probe::Found(_) => false,
            Probe::Vacant(i) => {
                t.occupy(i, k, k, v);
                true
            }
        }
    }

    #[test]
    fn capacity_rounding_and_load_limit() {
        assert_eq!(round_capacity(0), 1);
        assert_eq!(round_capacity(1000), 1024);
        assert_eq!(round_capacity(1024), 1024);
        assert_eq!(max_load_for(1024), 896);
        assert_eq!(max_load_for(8), 7);
        assert_eq!(max_load_for(1), 0);
        assert_eq!(max_load_for(2), 1);
    }

    #[test]
    fn grows_before_exceeding_load_limit() {
        let mut t: Table<u64, u64> = Table::new(8);
        for k in 0..7 {
            assert!(insert(&mut t, k, k));
        }
        assert_eq!(t.capacity(), 8);
        assert!(insert(&mut t, 7, 7));
        assert_eq!(t.capacity(), 16);
        assert_eq!(t.max_load(), 14);
        for k in 0..8 {
            assert!(t.find(k, |x| *x == k).is_some());
        }
    }

    #[test]
    fn single_slot_table_grows_on_first_insert() {
        let mut t: Table<u64, u64> = Table::new(0);
        assert_eq!(t.capacity(), 1);
        assert!(insert(&mut t, 3, 30));
        assert_eq!(t.capacity(), 2);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn rehash_drops_tombstones() {
        let mut t: Table<u64, u64> = Table::new(8);
        for k in 0..5 {
            insert(&mut t, k, k);
        }
        let i = t.find(2, |x| *x == 2).unwrap();
        assert_eq!(t.erase_slot(i), Some((2, 2)));
        assert_eq!(t.tombstones(), 1);
        t.rehash().unwrap();
        assert_eq!(t.tombstones(), 0);
        assert_eq!(t.len(), 4);
        assert!(t.find(2, |x| *x == 2).is_none());
    }

    #[test]
    fn rehash_moves_registered_cursor_with_its_entry() {
        let mut t: Table<u64, u64> = Table::new(8);
        for k in 0..6 {
            insert(&mut t, k * 8, k);
        }
        let i = t.find(40, |x| *x == 40).unwrap();
        let a = t.register(i).unwrap();
        let b = t.register(i).unwrap();
        t.rehash().unwrap();

        let reg = t.registry.borrow();
        let (na, nb) = (reg.node(a).unwrap(), reg.node(b).unwrap());
        assert_eq!(na, nb);
        assert_eq!(t.store.key(na.index), Some(&40));
        assert_eq!(t.store.tag(na.index), Tag::Occupied);
    }

    #[test]
    fn reused_tombstone_does_not_revive_cursor() {
        let mut t: Table<u64, u64> = Table::new(8);
        insert(&mut t, 0, 0);
        let i = t.find(0, |x| *x == 0).unwrap();
        let c = t.register(i).unwrap();
        t.erase_slot(i);
        // Same hash, so the new key lands on the tombstone.
        match t.prepare_insert(0, |_| false).unwrap() {
            Probe::Vacant(j) => {
                assert_eq!(j, i);
                t.occupy(j, 0, 100, 1);
            }
            Probe::Found(_) => panic!("key 100 was never inserted"),
        }
        assert!(t.registry.borrow().node(c).unwrap().erased);
        assert_eq!(t.tombstones(), 0);
    }

    /// Invariant: Once the last `Free` slot is taken, the next new key
    /// rehashes even below the load limit, clearing the tombstones.
    #[test]
    fn exhausting_free_slots_forces_rehash() {
        let mut t: Table<u64, u64> = Table::new(8);
        for k in 0..7 {
            insert(&mut t, k, k);
        }
        for k in 0..6 {
            let i = t.find(k, |x| *x == k).unwrap();
            t.erase_slot(i);
        }
        assert!(insert(&mut t, 7, 7));
        assert_eq!((t.capacity(), t.len(), t.tombstones(), t.free), (8, 2, 6, 0));

        // Duplicates still resolve without growing.
        assert!(!insert(&mut t, 7, 0));
        assert_eq!(t.capacity(), 8);

        assert!(insert(&mut t, 8, 8));
        assert_eq!((t.capacity(), t.len(), t.tombstones()), (16, 3, 0));
        assert_eq!(t.free, 13);
        for k in [6, 7, 8] {
            assert!(t.find(k, |x| *x == k).is_some());
        }
    }
}
