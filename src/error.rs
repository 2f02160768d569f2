//! Error taxonomy shared by the table, its cursors, and the cursor pool.

use thiserror::Error;

/// Failures reported by `FlashMap` and `Cursor` operations.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq, Hash)]
pub enum FlashMapError {
    /// The requested key is not present.
    #[error("key not found")]
    NotFound,
    /// The entry under the cursor was erased after the cursor was placed.
    #[error("cursor refers to an erased entry")]
    UseAfterErase,
    /// The cursor's table was dropped, cleared, or moved out of, or the cursor
    /// was used with a table it does not belong to.
    #[error("cursor is no longer attached to this table")]
    Invalidated,
    /// The underlying allocator refused a request.
    #[error("allocation failed")]
    AllocationFailure,
}

/// Allocation failure raised by `ChunkPool` and `SlotStore` growth.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
#[error("allocation failed")]
pub struct AllocError;

impl From<AllocError> for FlashMapError {
    fn from(_: AllocError) -> Self {
        FlashMapError::AllocationFailure
    }
}

impl From<std::collections::TryReserveError> for AllocError {
    fn from(_: std::collections::TryReserveError) -> Self {
        AllocError
    }
}
