//! Debug-only guard against user code re-entering a table mid-operation.
//!
//! `FlashMap` calls into `K: Hash` and `K: Eq` while a probe walk or a slot
//! write is in flight. A key type that reaches back into the same table from
//! those impls would observe half-updated state, so debug builds panic on
//! nested entry. Release builds compile the guard away.

#[cfg(debug_assertions)]
use core::cell::Cell;
use core::marker::PhantomData;

#[derive(Debug, Default)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    busy: Cell<bool>,
    // Single-threaded only.
    _nosend: PhantomData<*mut ()>,
}

impl DebugReentrancy {
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            busy: Cell::new(false),
            _nosend: PhantomData,
        }
    }

    /// Mark the table busy until the returned guard drops.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        assert!(
            !self.busy.replace(true),
            "FlashMap re-entered from Hash/Eq while an operation was in progress"
        );
        ReentrancyGuard { owner: self }
    }
}

pub struct ReentrancyGuard<'a> {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    owner: &'a DebugReentrancy,
}

impl Drop for ReentrancyGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.busy.set(false);
    }
}
