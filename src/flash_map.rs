//! FlashMap: public open-addressing map with resize-stable cursors.

use crate::cursor::Cursor;
use crate::error::FlashMapError;
use crate::probe::Probe;
use crate::reentrancy::DebugReentrancy;
use crate::registry::Registry;
use crate::table::{Table, DEFAULT_CAPACITY};
use core::borrow::Borrow;
use core::cell::RefCell;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Index;
use std::alloc::{handle_alloc_error, Layout};
use std::collections::hash_map::RandomState;
use std::rc::{Rc, Weak};

pub struct FlashMap<K, V, S = RandomState> {
    hasher: S,
    pub(crate) table: Table<K, V>,
    end: Cursor<K, V, S>,
    reentrancy: DebugReentrancy,
}

impl<K, V> FlashMap<K, V>
where
    K: Eq + Hash,
{
    /// Empty map with `DEFAULT_CAPACITY` slots.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Empty map with at least `capacity` slots, rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

/// An empty table with `DEFAULT_CAPACITY` slots; `std::mem::take` on a map
/// leaves one of these behind and detaches cursors from the moved-out-of
/// binding.
impl<K, V, S> Default for FlashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

fn make_hash<S: BuildHasher, Q: ?Sized + Hash>(hasher: &S, q: &Q) -> u64 {
    hasher.hash_one(q)
}

fn alloc_failure<K, V>() -> ! {
    handle_alloc_error(Layout::new::<(K, V)>())
}

impl<K, V, S> FlashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(DEFAULT_CAPACITY, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        let table = Table::new(capacity);
        let end = Cursor::sentinel(Rc::downgrade(&table.registry));
        Self {
            hasher,
            table,
            end,
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// Build a map from key/value pairs. Later duplicates of a key are
    /// ignored, as with `insert`.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, FlashMapError>
    where
        I: IntoIterator<Item = (K, V)>,
        S: Default,
    {
        let mut map = Self::with_hasher(S::default());
        for (k, v) in pairs {
            map.insert(k, v)?;
        }
        Ok(map)
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Number of slots; also the index of the end position.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Entry count above which the next insert doubles the table.
    pub fn max_load(&self) -> usize {
        self.table.max_load()
    }

    pub fn tombstones(&self) -> usize {
        self.table.tombstones()
    }

    /// Number of registered cursors (end cursors are not registered).
    pub fn live_cursors(&self) -> usize {
        self.table.live_cursors()
    }

    pub(crate) fn owns(&self, registry: &Weak<RefCell<Registry>>) -> bool {
        core::ptr::eq(registry.as_ptr(), Rc::as_ptr(&self.table.registry))
    }

    /// Insert `key -> value` if `key` is absent.
    ///
    /// Returns `Ok(false)` and leaves the stored value untouched when the key
    /// is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, FlashMapError> {
        let _g = self.reentrancy.enter();
        let hash = make_hash(&self.hasher, &key);
        match self.table.prepare_insert(hash, |k| *k == key) {
            Ok(Probe::Found(_)) => Ok(false),
            Ok(Probe::Vacant(i)) => {
                self.table.occupy(i, hash, key, value);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    capacity = self.table.capacity(),
                    entries = self.table.len(),
                    "FlashMap growth allocation failed"
                );
                Err(e.into())
            }
        }
    }

    /// Value for `key`, inserting `default()` first if it is absent.
    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        let hash = make_hash(&self.hasher, &key);
        match self.table.prepare_insert(hash, |k| *k == key) {
            Ok(Probe::Found(i)) => match self.table.value_mut(i) {
                Some(v) => v,
                None => unreachable!("probe reported an occupied slot"),
            },
            Ok(Probe::Vacant(i)) => self.table.occupy(i, hash, key, default()),
            Err(_) => alloc_failure::<K, V>(),
        }
    }

    /// Index-assign: value for `key`, inserting `V::default()` if absent.
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    fn slot_of<Q>(&self, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let hash = make_hash(&self.hasher, q);
        self.table.find(hash, |k| k.borrow() == q)
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.slot_of(q)?;
        self.table.store.entry(i).map(|(_, v)| v)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.slot_of(q)?;
        self.table.value_mut(i)
    }

    pub fn at<Q>(&self, q: &Q) -> Result<&V, FlashMapError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(q).ok_or(FlashMapError::NotFound)
    }

    pub fn at_mut<Q>(&mut self, q: &Q) -> Result<&mut V, FlashMapError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_mut(q).ok_or(FlashMapError::NotFound)
    }

    pub fn contains<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.slot_of(q).is_some()
    }

    /// Remove `q`'s entry, returning its value.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let i = self.slot_of(q)?;
        self.table.erase_slot(i).map(|(_, v)| v)
    }

    /// Tombstone `q`'s entry. `false` if it was absent.
    pub fn erase<Q>(&mut self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove(q).is_some()
    }

    /// Erase the entry under `cursor`.
    ///
    /// `false` if the cursor is detached, belongs to another table, sits at
    /// the end, or its entry is already gone. Other cursors stay valid.
    pub fn erase_at(&mut self, cursor: &Cursor<K, V, S>) -> bool {
        match cursor.index_in(self) {
            Ok(i) => self.table.erase_slot(i).is_some(),
            Err(_) => false,
        }
    }

    /// Drop every entry and detach every outstanding cursor. Capacity is kept.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter();
        self.table.clear();
    }

    fn cursor_at(&self, index: usize) -> Result<Cursor<K, V, S>, FlashMapError> {
        let key = self.table.register(index).map_err(|e| {
            tracing::warn!(
                live_cursors = self.table.live_cursors(),
                "FlashMap cursor registration failed"
            );
            e
        })?;
        Ok(Cursor::attached(Rc::downgrade(&self.table.registry), key))
    }

    /// Cursor on `q`'s entry, or an end cursor when absent.
    pub fn find<Q>(&self, q: &Q) -> Result<Cursor<K, V, S>, FlashMapError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.slot_of(q) {
            Some(i) => self.cursor_at(i),
            None => Ok(self.end.end_of_same_table()),
        }
    }

    /// Cursor on the first occupied slot, or an end cursor when empty.
    pub fn begin(&self) -> Result<Cursor<K, V, S>, FlashMapError> {
        let i = self.table.first_occupied();
        if i >= self.capacity() {
            Ok(self.end.end_of_same_table())
        } else {
            self.cursor_at(i)
        }
    }

    /// The table's shared end cursor.
    pub fn end(&self) -> &Cursor<K, V, S> {
        &self.end
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.table.store.payloads().iter(),
            remaining: self.table.len(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let remaining = self.table.len();
        IterMut {
            slots: self.table.store.payloads_mut().iter_mut(),
            remaining,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

/// Copy construction. The copy has its own registry; cursors into `self` do
/// not attach to it. `clone_from` replaces the target's contents and detaches
/// the target's outstanding cursors.
impl<K, V, S> Clone for FlashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        let table = self.table.clone();
        let end = Cursor::sentinel(Rc::downgrade(&table.registry));
        Self {
            hasher: self.hasher.clone(),
            table,
            end,
            reentrancy: DebugReentrancy::new(),
        }
    }
}

impl<K, V, S> fmt::Debug for FlashMap<K, V, S>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, Q> Index<&Q> for FlashMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found in FlashMap")
    }
}

impl<K, V, S> Extend<(K, V)> for FlashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            if self.insert(k, v).is_err() {
                alloc_failure::<K, V>();
            }
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for FlashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

/// Borrowing iterator in physical slot order.
pub struct Iter<'a, K, V> {
    slots: core::slice::Iter<'a, Option<(K, V)>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let item = self.slots.find_map(|e| e.as_ref().map(|(k, v)| (k, v)))?;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Mutable iterator in physical slot order.
pub struct IterMut<'a, K, V> {
    slots: core::slice::IterMut<'a, Option<(K, V)>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let item = self
            .slots
            .find_map(|e| e.as_mut().map(|(k, v)| (&*k, v)))?;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// Owning iterator in physical slot order.
pub struct IntoIter<K, V> {
    slots: std::vec::IntoIter<Option<(K, V)>>,
    remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let item = self.slots.find_map(|e| e)?;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}

impl<K, V, S> IntoIterator for FlashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    /// Consumes the map; outstanding cursors become detached.
    fn into_iter(self) -> IntoIter<K, V> {
        let remaining = self.table.len();
        IntoIter {
            slots: self.table.store.into_payloads().into_iter(),
            remaining,
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a FlashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut FlashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}
