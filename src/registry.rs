//! Registry of live cursors.
//!
//! Each outstanding `Cursor` owns one node in a `ChunkPool`; the node records
//! the slot the cursor sits on, and live nodes are also filed by slot. The
//! table looks cursors up by slot whenever it moves or drops slots, so cursors
//! follow their entry through a rehash and learn about erasure and `clear`
//! without holding pointers into table storage.

use crate::chunk_pool::ChunkPool;
use crate::error::AllocError;
use hashbrown::HashMap;

slotmap::new_key_type! {
    /// Generational key of a registered cursor.
    pub struct CursorKey;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Node {
    /// Logical slot index; equal to the registry's `end` for end cursors.
    pub index: usize,
    /// The entry this cursor pointed at has been erased.
    pub erased: bool,
}

pub(crate) struct Registry {
    nodes: ChunkPool<CursorKey, Node>,
    // Live (not erased) cursors grouped by slot, so erasing or relocating a
    // slot touches only the cursors on it.
    by_slot: HashMap<usize, Vec<CursorKey>>,
    end: usize,
}

impl Registry {
    pub fn new(end: usize) -> Self {
        Self {
            nodes: ChunkPool::new(),
            by_slot: HashMap::new(),
            end,
        }
    }

    /// One past the last slot of the owning table.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of slots that currently have at least one live cursor.
    #[cfg(test)]
    pub fn occupied_slots(&self) -> usize {
        self.by_slot.len()
    }

    fn link(&mut self, index: usize, key: CursorKey) {
        self.by_slot.entry(index).or_default().push(key);
    }

    fn unlink(&mut self, index: usize, key: CursorKey) {
        if let Some(keys) = self.by_slot.get_mut(&index) {
            if let Some(pos) = keys.iter().position(|k| *k == key) {
                keys.swap_remove(pos);
            }
            if keys.is_empty() {
                self.by_slot.remove(&index);
            }
        }
    }

    pub fn register(&mut self, node: Node) -> Result<CursorKey, AllocError> {
        let key = self.nodes.allocate(node)?;
        if !node.erased {
            self.link(node.index, key);
        }
        Ok(key)
    }

    pub fn deregister(&mut self, key: CursorKey) {
        if let Some(node) = self.nodes.free(key) {
            if !node.erased {
                self.unlink(node.index, key);
            }
        }
    }

    pub fn node(&self, key: CursorKey) -> Option<Node> {
        self.nodes.get(key).copied()
    }

    pub fn set_index(&mut self, key: CursorKey, index: usize) -> bool {
        let Some(n) = self.nodes.get_mut(key) else {
            return false;
        };
        let (old, erased) = (n.index, n.erased);
        n.index = index;
        if !erased && old != index {
            self.unlink(old, key);
            self.link(index, key);
        }
        true
    }

    /// Flag every cursor sitting on `index` as pointing at an erased entry.
    pub fn mark_erased(&mut self, index: usize) {
        let Some(keys) = self.by_slot.remove(&index) else {
            return;
        };
        for key in keys {
            if let Some(n) = self.nodes.get_mut(key) {
                n.erased = true;
            }
        }
    }

    /// Drop every node; all outstanding cursors become detached. Returns how
    /// many cursors were invalidated.
    pub fn invalidate_all(&mut self) -> usize {
        let n = self.nodes.len();
        self.nodes.clear();
        self.by_slot.clear();
        n
    }

    /// Move every live cursor to its entry's new slot.
    ///
    /// `relocate` is called once per distinct old index and its answer is
    /// shared by every cursor on that slot. `None` means the slot held no live
    /// entry, and the cursors on it are flagged erased. End cursors move to
    /// `new_end`. Returns the number of cursors moved.
    pub fn relocate(
        &mut self,
        new_end: usize,
        mut relocate: impl FnMut(usize) -> Option<usize>,
    ) -> usize {
        let old_end = self.end;
        let old_slots = core::mem::take(&mut self.by_slot);
        let mut moved = 0;
        for (old, keys) in old_slots {
            let target = if old == old_end {
                Some(new_end)
            } else {
                relocate(old)
            };
            for key in &keys {
                if let Some(n) = self.nodes.get_mut(*key) {
                    match target {
                        Some(new_index) => n.index = new_index,
                        None => n.erased = true,
                    }
                }
            }
            if let Some(new_index) = target {
                if old != old_end {
                    moved += keys.len();
                }
                self.by_slot.entry(new_index).or_default().extend(keys);
            }
        }
        self.end = new_end;
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(index: usize) -> Node {
        Node {
            index,
            erased: false,
        }
    }

    /// Invariant: Cursors sharing a slot are relocated by a single call and
    /// land on the same new slot.
    #[test]
    fn relocate_memoizes_shared_slots() {
        let mut r = Registry::new(8);
        let a = r.register(at(3)).unwrap();
        let b = r.register(at(3)).unwrap();
        let c = r.register(at(5)).unwrap();
        let e = r.register(at(8)).unwrap();

        let mut calls = Vec::new();
        let moved = r.relocate(16, |old| {
            calls.push(old);
            Some(old + 10)
        });
        calls.sort_unstable();
        assert_eq!(calls, vec![3, 5]);
        assert_eq!(moved, 3);
        assert_eq!(r.node(a).unwrap().index, 13);
        assert_eq!(r.node(b).unwrap().index, 13);
        assert_eq!(r.node(c).unwrap().index, 15);
        assert_eq!(r.node(e).unwrap().index, 16, "end cursor tracks new end");
        assert_eq!(r.end(), 16);
    }

    /// Invariant: Erased cursors are skipped by relocation and stay erased.
    #[test]
    fn erased_cursors_are_not_relocated() {
        let mut r = Registry::new(8);
        let a = r.register(at(2)).unwrap();
        let b = r.register(at(4)).unwrap();
        r.mark_erased(2);

        let moved = r.relocate(16, |old| if old == 4 { Some(9) } else { None });
        assert_eq!(moved, 1);
        assert!(r.node(a).unwrap().erased);
        let nb = r.node(b).unwrap();
        assert_eq!((nb.index, nb.erased), (9, false));
    }

    /// Invariant: `invalidate_all` detaches every key.
    #[test]
    fn invalidate_all_detaches_keys() {
        let mut r = Registry::new(4);
        let keys: Vec<_> = (0..3).map(|i| r.register(at(i)).unwrap()).collect();
        assert_eq!(r.invalidate_all(), 3);
        assert_eq!(r.len(), 0);
        assert!(keys.iter().all(|k| r.node(*k).is_none()));
        assert!(!r.set_index(keys[0], 1));
    }

    /// Invariant: After a burst of cursors is dropped, no slot keeps any
    /// bookkeeping, and erasing a slot flags only the cursors on it.
    #[test]
    fn dropped_cursors_leave_no_slot_entries() {
        let mut r = Registry::new(64);
        let burst: Vec<_> = (0..5_000).map(|i| r.register(at(i % 64)).unwrap()).collect();
        assert_eq!(r.occupied_slots(), 64);
        for k in burst {
            r.deregister(k);
        }
        assert_eq!(r.len(), 0);
        assert_eq!(r.occupied_slots(), 0);

        let a = r.register(at(7)).unwrap();
        let b = r.register(at(9)).unwrap();
        r.mark_erased(7);
        assert!(r.node(a).unwrap().erased);
        assert!(!r.node(b).unwrap().erased);
        assert_eq!(r.occupied_slots(), 1);
    }

    /// Invariant: Moving a cursor re-files it under its new slot.
    #[test]
    fn set_index_moves_slot_entry() {
        let mut r = Registry::new(8);
        let a = r.register(at(1)).unwrap();
        assert!(r.set_index(a, 5));
        r.mark_erased(1);
        assert!(!r.node(a).unwrap().erased);
        r.mark_erased(5);
        assert!(r.node(a).unwrap().erased);
        assert_eq!(r.occupied_slots(), 0);

        // Erased cursors are no longer filed anywhere; dropping them is fine.
        r.deregister(a);
        assert_eq!(r.len(), 0);
    }
}
