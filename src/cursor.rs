//! Cursor: a registered, non-owning position inside a `FlashMap`.
//!
//! A cursor holds a `Weak` link to its table's registry and the key of its
//! registry node; the node stores the slot index. The table rewrites that
//! index when it rehashes and flags it when the entry is erased, so a cursor
//! keeps pointing at the same logical entry across growth and reports erasure
//! instead of reading whatever later lands in the slot.
//!
//! Accessors take the table explicitly and check that the cursor belongs to
//! it. A dropped, cleared, or moved-out-of table, or a foreign table, yields
//! `FlashMapError::Invalidated`.

use crate::error::FlashMapError;
use crate::flash_map::FlashMap;
use crate::registry::{CursorKey, Registry};
use core::cell::RefCell;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use std::collections::hash_map::RandomState;
use std::rc::Weak;

pub struct Cursor<K, V, S = RandomState> {
    registry: Weak<RefCell<Registry>>,
    // `None` for end cursors: they always sit on the registry's end index and
    // need no node.
    node: Option<CursorKey>,
    _pd: PhantomData<fn() -> (K, V, S)>,
}

impl<K, V, S> Cursor<K, V, S> {
    pub(crate) fn attached(registry: Weak<RefCell<Registry>>, node: CursorKey) -> Self {
        Self {
            registry,
            node: Some(node),
            _pd: PhantomData,
        }
    }

    pub(crate) fn sentinel(registry: Weak<RefCell<Registry>>) -> Self {
        Self {
            registry,
            node: None,
            _pd: PhantomData,
        }
    }

    /// An end cursor for the same table.
    pub(crate) fn end_of_same_table(&self) -> Self {
        Self::sentinel(self.registry.clone())
    }

    /// Logical slot index; the table's capacity for end cursors.
    ///
    /// Needs no table reference, so it also reports a dropped table.
    pub fn index(&self) -> Result<usize, FlashMapError> {
        let registry = self.registry.upgrade().ok_or(FlashMapError::Invalidated)?;
        let registry = registry.borrow();
        let Some(key) = self.node else {
            return Ok(registry.end());
        };
        let node = registry.node(key).ok_or(FlashMapError::Invalidated)?;
        if node.erased {
            Err(FlashMapError::UseAfterErase)
        } else {
            Ok(node.index)
        }
    }

    /// Whether this cursor is still attached and its entry not erased.
    pub fn is_valid(&self) -> bool {
        self.index().is_ok()
    }
}

impl<K, V, S> Cursor<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn index_in(&self, map: &FlashMap<K, V, S>) -> Result<usize, FlashMapError> {
        if !map.owns(&self.registry) {
            return Err(FlashMapError::Invalidated);
        }
        self.index()
    }

    pub fn is_end(&self, map: &FlashMap<K, V, S>) -> Result<bool, FlashMapError> {
        Ok(self.index_in(map)? >= map.capacity())
    }

    /// Key/value view of the entry under the cursor.
    ///
    /// `NotFound` at the end position.
    pub fn entry<'m>(&self, map: &'m FlashMap<K, V, S>) -> Result<(&'m K, &'m V), FlashMapError> {
        let i = self.index_in(map)?;
        if i >= map.capacity() {
            return Err(FlashMapError::NotFound);
        }
        map.table.store.entry(i).ok_or(FlashMapError::UseAfterErase)
    }

    pub fn key<'m>(&self, map: &'m FlashMap<K, V, S>) -> Result<&'m K, FlashMapError> {
        self.entry(map).map(|(k, _)| k)
    }

    pub fn value<'m>(&self, map: &'m FlashMap<K, V, S>) -> Result<&'m V, FlashMapError> {
        self.entry(map).map(|(_, v)| v)
    }

    pub fn value_mut<'m>(
        &self,
        map: &'m mut FlashMap<K, V, S>,
    ) -> Result<&'m mut V, FlashMapError> {
        let i = self.index_in(map)?;
        if i >= map.capacity() {
            return Err(FlashMapError::NotFound);
        }
        map.table
            .value_mut(i)
            .ok_or(FlashMapError::UseAfterErase)
    }

    /// Step to the next occupied slot, or to the end. Stays put at the end.
    pub fn advance(&mut self, map: &FlashMap<K, V, S>) -> Result<(), FlashMapError> {
        let i = self.index_in(map)?;
        let Some(key) = self.node else {
            return Ok(());
        };
        if i >= map.capacity() {
            return Ok(());
        }
        let next = map.table.store.next_occupied(i + 1);
        let registry = self.registry.upgrade().ok_or(FlashMapError::Invalidated)?;
        let updated = registry.borrow_mut().set_index(key, next);
        if updated {
            Ok(())
        } else {
            Err(FlashMapError::Invalidated)
        }
    }
}

impl<K, V, S> Cursor<K, V, S> {
    /// Register a second cursor at the same position.
    pub fn try_clone(&self) -> Result<Self, FlashMapError> {
        let Some(key) = self.node else {
            return Ok(self.end_of_same_table());
        };
        let registry = self.registry.upgrade().ok_or(FlashMapError::Invalidated)?;
        let mut reg = registry.borrow_mut();
        let node = reg.node(key).ok_or(FlashMapError::Invalidated)?;
        let copy = reg.register(node)?;
        Ok(Self::attached(self.registry.clone(), copy))
    }
}

impl<K, V, S> Drop for Cursor<K, V, S> {
    fn drop(&mut self) {
        let Some(key) = self.node else {
            return;
        };
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Ok(mut reg) = registry.try_borrow_mut() {
            reg.deregister(key);
        };
    }
}

/// Same table and same position. Detached cursors compare unequal to
/// everything.
impl<K, V, S> PartialEq for Cursor<K, V, S> {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.registry, &other.registry)
            && matches!((self.index(), other.index()), (Ok(a), Ok(b)) if a == b)
    }
}

impl<K, V, S> fmt::Debug for Cursor<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("index", &self.index())
            .field("end_sentinel", &self.node.is_none())
            .finish()
    }
}
