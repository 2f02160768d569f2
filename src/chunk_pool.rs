//! ChunkPool: typed free-list allocator for small, high-churn nodes.
//!
//! Cells are carved sequentially out of fixed-size chunks. A freed cell is
//! threaded onto an intrusive free list and handed out again before another
//! chunk is requested. Chunks are kept until the pool itself is dropped.
//!
//! Every cell carries a version, so the keys handed out are generational in
//! the same way `slotmap` keys are: a key for a freed cell never resolves to
//! whatever occupies that cell next. Keys use slotmap's `KeyData` encoding
//! (index in the low 32 bits, odd version in the high 32 bits).

use crate::error::AllocError;
use core::marker::PhantomData;
use slotmap::{Key, KeyData};

/// Cells per chunk.
pub const CHUNK_CELLS: usize = 128;

// End of the free list. Also the index slotmap reserves for its null key, so
// it is never handed out.
const NO_FREE: u32 = u32::MAX;

enum CellState<T> {
    Vacant { next_free: u32 },
    Occupied(T),
}

struct Cell<T> {
    version: u32,
    state: CellState<T>,
}

pub struct ChunkPool<K, T> {
    chunks: Vec<Vec<Cell<T>>>,
    free_head: u32,
    len: usize,
    _key: PhantomData<fn(K) -> K>,
}

impl<K: Key, T> Default for ChunkPool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, T> ChunkPool<K, T> {
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            free_head: NO_FREE,
            len: 0,
            _key: PhantomData,
        }
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks obtained from the system allocator so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    fn encode(idx: u32, version: u32) -> K {
        K::from(KeyData::from_ffi((u64::from(version) << 32) | u64::from(idx)))
    }

    #[inline]
    fn decode(key: K) -> (u32, u32) {
        let raw = key.data().as_ffi();
        ((raw & 0xffff_ffff) as u32, (raw >> 32) as u32)
    }

    #[inline]
    fn cell(&self, idx: u32) -> Option<&Cell<T>> {
        let idx = idx as usize;
        self.chunks.get(idx / CHUNK_CELLS)?.get(idx % CHUNK_CELLS)
    }

    #[inline]
    fn cell_mut(&mut self, idx: u32) -> Option<&mut Cell<T>> {
        let idx = idx as usize;
        self.chunks
            .get_mut(idx / CHUNK_CELLS)?
            .get_mut(idx % CHUNK_CELLS)
    }

    fn carved(&self) -> usize {
        match self.chunks.last() {
            Some(last) => (self.chunks.len() - 1) * CHUNK_CELLS + last.len(),
            None => 0,
        }
    }

    fn acquire_chunk(&mut self) -> Result<(), AllocError> {
        self.chunks.try_reserve(1)?;
        let mut chunk = Vec::new();
        chunk.try_reserve_exact(CHUNK_CELLS)?;
        self.chunks.push(chunk);
        tracing::trace!(chunks = self.chunks.len(), "chunk pool acquired chunk");
        Ok(())
    }

    /// Store `value` in a cell and return its key.
    pub fn allocate(&mut self, value: T) -> Result<K, AllocError> {
        if self.free_head != NO_FREE {
            let idx = self.free_head;
            let cell = self.cell_mut(idx).ok_or(AllocError)?;
            let next = match cell.state {
                CellState::Vacant { next_free } => next_free,
                CellState::Occupied(_) => return Err(AllocError),
            };
            cell.version = cell.version.wrapping_add(1);
            cell.state = CellState::Occupied(value);
            let version = cell.version;
            self.free_head = next;
            self.len += 1;
            return Ok(Self::encode(idx, version));
        }

        let idx = self.carved();
        if idx >= NO_FREE as usize {
            return Err(AllocError);
        }
        if self.chunks.last().map_or(true, |c| c.len() == CHUNK_CELLS) {
            self.acquire_chunk()?;
        }
        let chunk = self.chunks.last_mut().ok_or(AllocError)?;
        // Capacity was reserved up front; this push never reallocates.
        chunk.push(Cell {
            version: 1,
            state: CellState::Occupied(value),
        });
        self.len += 1;
        Ok(Self::encode(idx as u32, 1))
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let (idx, version) = Self::decode(key);
        let cell = self.cell(idx)?;
        match &cell.state {
            CellState::Occupied(v) if cell.version == version => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let (idx, version) = Self::decode(key);
        let cell = self.cell_mut(idx)?;
        match &mut cell.state {
            CellState::Occupied(v) if cell.version == version => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Return a cell to the free list, yielding its value.
    pub fn free(&mut self, key: K) -> Option<T> {
        let (idx, version) = Self::decode(key);
        let head = self.free_head;
        let cell = self.cell_mut(idx)?;
        if cell.version != version || matches!(cell.state, CellState::Vacant { .. }) {
            return None;
        }
        cell.version = cell.version.wrapping_add(1);
        let old = core::mem::replace(&mut cell.state, CellState::Vacant { next_free: head });
        self.free_head = idx;
        self.len -= 1;
        match old {
            CellState::Occupied(v) => Some(v),
            CellState::Vacant { .. } => None,
        }
    }

    /// Free every occupied cell. Chunks are retained.
    pub fn clear(&mut self) {
        let mut head = self.free_head;
        for (ci, chunk) in self.chunks.iter_mut().enumerate().rev() {
            for (off, cell) in chunk.iter_mut().enumerate().rev() {
                if let CellState::Occupied(_) = cell.state {
                    cell.version = cell.version.wrapping_add(1);
                    cell.state = CellState::Vacant { next_free: head };
                    head = (ci * CHUNK_CELLS + off) as u32;
                }
            }
        }
        self.free_head = head;
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.chunks.iter().enumerate().flat_map(|(ci, chunk)| {
            chunk
                .iter()
                .enumerate()
                .filter_map(move |(off, cell)| match &cell.state {
                    CellState::Occupied(v) => {
                        Some((Self::encode((ci * CHUNK_CELLS + off) as u32, cell.version), v))
                    }
                    CellState::Vacant { .. } => None,
                })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> {
        self.chunks.iter_mut().enumerate().flat_map(|(ci, chunk)| {
            chunk
                .iter_mut()
                .enumerate()
                .filter_map(move |(off, cell)| {
                    let version = cell.version;
                    match &mut cell.state {
                        CellState::Occupied(v) => {
                            Some((Self::encode((ci * CHUNK_CELLS + off) as u32, version), v))
                        }
                        CellState::Vacant { .. } => None,
                    }
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::DefaultKey;

    /// Invariant: A freed cell is reused before a new cell is carved, and the
    /// old key does not resolve to the new occupant.
    #[test]
    fn freed_cell_is_reused_with_new_version() {
        let mut p: ChunkPool<DefaultKey, u32> = ChunkPool::new();
        let a = p.allocate(1).unwrap();
        let _b = p.allocate(2).unwrap();
        assert_eq!(p.free(a), Some(1));
        assert_eq!(p.get(a), None);

        let c = p.allocate(3).unwrap();
        assert_ne!(a, c);
        assert_eq!(p.get(a), None, "stale key must not alias");
        assert_eq!(p.get(c), Some(&3));
        assert_eq!(p.len(), 2);
        assert_eq!(p.chunk_count(), 1);
    }

    /// Invariant: A new chunk is only requested once the current one is full
    /// and the free list is empty.
    #[test]
    fn chunks_grow_in_fixed_steps() {
        let mut p: ChunkPool<DefaultKey, usize> = ChunkPool::new();
        assert_eq!(p.chunk_count(), 0);
        let keys: Vec<_> = (0..CHUNK_CELLS).map(|i| p.allocate(i).unwrap()).collect();
        assert_eq!(p.chunk_count(), 1);

        let extra = p.allocate(CHUNK_CELLS).unwrap();
        assert_eq!(p.chunk_count(), 2);

        // Freeing and reallocating stays within the existing chunks.
        for k in &keys[..10] {
            p.free(*k).unwrap();
        }
        for i in 0..10 {
            p.allocate(i).unwrap();
        }
        assert_eq!(p.chunk_count(), 2);
        assert_eq!(p.get(extra), Some(&CHUNK_CELLS));
    }

    /// Invariant: Double free is rejected and leaves the pool unchanged.
    #[test]
    fn double_free_is_rejected() {
        let mut p: ChunkPool<DefaultKey, &'static str> = ChunkPool::new();
        let k = p.allocate("x").unwrap();
        assert_eq!(p.free(k), Some("x"));
        assert_eq!(p.free(k), None);
        assert!(p.is_empty());
    }

    /// Invariant: `clear` frees every cell, invalidates every key, and keeps
    /// the chunks for reuse.
    #[test]
    fn clear_keeps_chunks_and_invalidates_keys() {
        let mut p: ChunkPool<DefaultKey, usize> = ChunkPool::new();
        let keys: Vec<_> = (0..200).map(|i| p.allocate(i).unwrap()).collect();
        assert_eq!(p.chunk_count(), 2);
        p.clear();
        assert!(p.is_empty());
        assert_eq!(p.chunk_count(), 2);
        assert!(keys.iter().all(|k| p.get(*k).is_none()));

        for i in 0..200 {
            p.allocate(i).unwrap();
        }
        assert_eq!(p.chunk_count(), 2);
        assert!(keys.iter().all(|k| !p.contains(*k)));
    }

    /// Invariant: Iteration yields exactly the occupied cells with keys that
    /// resolve back to them.
    #[test]
    fn iter_visits_occupied_cells() {
        let mut p: ChunkPool<DefaultKey, usize> = ChunkPool::new();
        let keys: Vec<_> = (0..5).map(|i| p.allocate(i * 10).unwrap()).collect();
        p.free(keys[2]).unwrap();

        let seen: Vec<_> = p.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(seen.len(), 4);
        for (k, v) in &seen {
            assert_eq!(p.get(*k), Some(v));
        }

        for (_k, v) in p.iter_mut() {
            *v += 1;
        }
        assert_eq!(p.get(keys[0]), Some(&1));
        assert_eq!(p.get(keys[4]), Some(&41));
    }
}
