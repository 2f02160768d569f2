//! flash-map: a single-threaded, open-addressing hash map whose cursors
//! survive resizing.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: let a caller keep a cursor on an entry while the table grows and
//!   physically moves every entry, and have misuse of that cursor reported
//!   rather than silently read.
//! - Layers (leaves first):
//!   - ChunkPool<K, T>: free-list allocator carving fixed-size chunks into
//!     cells and handing out generational keys.
//!   - SlotStore<K, V>: parallel arrays of tag, cached hash, and payload.
//!   - probe: triangular probe sequence plus the lookup and
//!     insertion-position walks.
//!   - Table<K, V>: insert/erase/clear/rehash over the store; owns the
//!     cursor registry.
//!   - Registry: one ChunkPool node per live cursor holding its slot index.
//!   - FlashMap<K, V, S>: public API; adds the hasher and a debug-only
//!     reentrancy guard.
//!   - Cursor<K, V, S>: registered position inside a FlashMap.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` (Rc/Weak, no atomics).
//! - Capacity is a power of two; growth doubles it once an insert would take
//!   the entry count above 7/8 of capacity. Tables never shrink.
//! - Deletion leaves tombstones; inserts reuse the first tombstone on their
//!   probe path and rehashing drops them all.
//! - Unique keys: inserting a present key is a no-op that reports `false`.
//!
//! Cursors
//! - A cursor is `(Weak<registry>, registry key)`. The table owns the
//!   registry, so dropping the table detaches every cursor.
//! - Rehash moves entries under live cursors first, memoizing old slot to
//!   new slot so cursors sharing an entry stay together, then sweeps the rest.
//! - Erasing an entry flags every cursor on that slot; a later insert into
//!   the tombstone cannot be observed through them (`UseAfterErase`).
//! - `clear` frees every registry node (`Invalidated`).
//! - End cursors have no node and always read the current capacity.
//!
//! Hashing
//! - Each slot caches the full `u64` hash; rehashing never calls `K: Hash`.
//!   A hash match is always confirmed with `K: Eq`.

mod chunk_pool;
pub mod cursor;
mod error;
pub mod flash_map;
mod flash_map_proptest;
mod probe;
mod reentrancy;
mod registry;
mod slot_store;
mod table;

// Public surface
pub use chunk_pool::{ChunkPool, CHUNK_CELLS};
pub use cursor::Cursor;
pub use error::{AllocError, FlashMapError};
pub use flash_map::{FlashMap, IntoIter, Iter, IterMut};
pub use registry::CursorKey;
pub use table::{DEFAULT_CAPACITY, LOAD_FACTOR_DEN, LOAD_FACTOR_NUM};
