//! SlotStore: structure-of-arrays storage for table slots.
//!
//! Tags and cached hashes sit in their own dense arrays so the probe loop only
//! walks those; payloads live in a parallel array and are touched once a hash
//! matches.

use crate::error::AllocError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tag {
    Free,
    Occupied,
    Deleted,
}

pub(crate) struct SlotStore<K, V> {
    tags: Vec<Tag>,
    hashes: Vec<u64>,
    entries: Vec<Option<(K, V)>>,
}

impl<K, V> SlotStore<K, V> {
    /// A store of `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            tags: vec![Tag::Free; capacity],
            hashes: vec![0; capacity],
            entries: core::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    /// Like `new`, but reports allocation failure instead of aborting.
    pub fn try_new(capacity: usize) -> Result<Self, AllocError> {
        let mut store = Self::new(0);
        store.grow(capacity)?;
        Ok(store)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn tag(&self, i: usize) -> Tag {
        self.tags[i]
    }

    #[inline]
    pub fn hash(&self, i: usize) -> u64 {
        self.hashes[i]
    }

    #[inline]
    pub fn key(&self, i: usize) -> Option<&K> {
        self.entries[i].as_ref().map(|(k, _)| k)
    }

    #[inline]
    pub fn entry(&self, i: usize) -> Option<(&K, &V)> {
        self.entries[i].as_ref().map(|(k, v)| (k, v))
    }

    #[inline]
    pub fn entry_mut(&mut self, i: usize) -> Option<(&K, &mut V)> {
        self.entries[i].as_mut().map(|(k, v)| (&*k, v))
    }

    /// Write an entry into slot `i`, marking it occupied.
    pub fn occupy(&mut self, i: usize, hash: u64, key: K, value: V) -> &mut V {
        self.tags[i] = Tag::Occupied;
        self.hashes[i] = hash;
        &mut self.entries[i].insert((key, value)).1
    }

    /// Tombstone slot `i` and hand back its payload.
    pub fn take(&mut self, i: usize) -> Option<(K, V)> {
        if self.tags[i] != Tag::Occupied {
            return None;
        }
        self.tags[i] = Tag::Deleted;
        self.entries[i].take()
    }

    /// Extend to `capacity` slots; the new ones start out free. Never shrinks.
    pub fn grow(&mut self, capacity: usize) -> Result<(), AllocError> {
        let extra = capacity.saturating_sub(self.len());
        self.tags.try_reserve_exact(extra)?;
        self.hashes.try_reserve_exact(extra)?;
        self.entries.try_reserve_exact(extra)?;
        self.tags.resize(capacity.max(self.tags.len()), Tag::Free);
        self.hashes.resize(capacity.max(self.hashes.len()), 0);
        self.entries.resize_with(capacity.max(self.entries.len()), || None);
        Ok(())
    }

    /// Mark every slot free, dropping all payloads.
    pub fn reset(&mut self) {
        self.tags.fill(Tag::Free);
        self.hashes.fill(0);
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    /// First occupied slot at or after `from`, or `len()` when there is none.
    pub fn next_occupied(&self, from: usize) -> usize {
        self.tags
            .get(from..)
            .and_then(|rest| rest.iter().position(|t| *t == Tag::Occupied))
            .map_or(self.len(), |off| from + off)
    }

    /// Payload column; `Some` exactly at occupied slots.
    pub fn payloads(&self) -> &[Option<(K, V)>] {
        &self.entries
    }

    pub fn payloads_mut(&mut self) -> &mut [Option<(K, V)>] {
        &mut self.entries
    }

    pub fn into_payloads(self) -> Vec<Option<(K, V)>> {
        self.entries
    }
}

impl<K: Clone, V: Clone> Clone for SlotStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            tags: self.tags.clone(),
            hashes: self.hashes.clone(),
            entries: self.entries.clone(),
        }
    }
}
