//! Probe sequence and the two walks built on it.
//!
//! Triangular probing: step `i` visits `(h + i(i+1)/2) mod capacity`. For a
//! power-of-two capacity the first `capacity` steps visit every slot exactly
//! once, so a walk that finds neither key nor free slot within one cycle has
//! seen the whole table.

use crate::slot_store::{SlotStore, Tag};

/// Slot indexes visited for one hash, in probe order.
pub(crate) struct ProbeSeq {
    pos: usize,
    stride: usize,
    mask: usize,
    remaining: usize,
}

impl ProbeSeq {
    pub fn new(hash: u64, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let mask = capacity - 1;
        Self {
            pos: hash as usize & mask,
            stride: 0,
            mask,
            remaining: capacity,
        }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let cur = self.pos;
        self.stride += 1;
        self.pos = (self.pos + self.stride) & self.mask;
        Some(cur)
    }
}

/// Outcome of the insertion-position walk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Probe {
    /// The key already lives in this slot.
    Found(usize),
    /// The key is absent; this is where it should go.
    Vacant(usize),
}

/// Lookup walk: slot holding a key that matches `hash` and `eq`.
///
/// Stops at the first free slot; walks past tombstones.
pub(crate) fn lookup<K, V>(
    store: &SlotStore<K, V>,
    hash: u64,
    mut eq: impl FnMut(&K) -> bool,
) -> Option<usize> {
    for i in ProbeSeq::new(hash, store.len()) {
        match store.tag(i) {
            Tag::Free => return None,
            Tag::Deleted => {}
            Tag::Occupied => {
                if store.hash(i) == hash && store.key(i).is_some_and(&mut eq) {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Insertion-position walk.
///
/// Like `lookup`, but remembers the first tombstone so a miss reuses it in
/// preference to the terminating free slot. `None` means the table has no
/// free or deleted slot left at all.
pub(crate) fn insert_position<K, V>(
    store: &SlotStore<K, V>,
    hash: u64,
    mut eq: impl FnMut(&K) -> bool,
) -> Option<Probe> {
    let mut tombstone = None;
    for i in ProbeSeq::new(hash, store.len()) {
        match store.tag(i) {
            Tag::Free => return Some(Probe::Vacant(tombstone.unwrap_or(i))),
            Tag::Deleted => {
                tombstone.get_or_insert(i);
            }
            Tag::Occupied => {
                if store.hash(i) == hash && store.key(i).is_some_and(&mut eq) {
                    return Some(Probe::Found(i));
                }
            }
        }
    }
    tombstone.map(Probe::Vacant)
}
