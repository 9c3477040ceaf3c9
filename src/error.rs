//! Error types for the allocator.

use thiserror::Error;

/// Errors surfaced by the heap operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    /// The request is larger than the heap's configured ceiling.
    #[error("requested {requested} bytes, over the {ceiling} byte ceiling")]
    TooLarge { requested: usize, ceiling: usize },

    /// `count * size` does not fit in a `usize`.
    #[error("allocating {count} elements of {size} bytes overflows")]
    Overflow { count: usize, size: usize },

    /// The heap source could not supply the bytes needed to grow the arena.
    #[error("arena exhausted, cannot grow by {0} bytes")]
    Exhausted(usize),

    /// The offset does not name the payload of a live allocation.
    #[error("offset {0:#x} is not the payload of an allocated region")]
    BadPointer(usize),

    /// A region's header and footer disagree, or a tag holds an impossible
    /// size. The arena has been written out of bounds.
    #[error("inconsistent boundary tags at offset {0:#x}")]
    Corrupted(usize),
}

/// Failure of the growth primitive: the backing buffer cannot be extended by
/// the requested number of bytes.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("heap source cannot grow by {0} bytes")]
pub struct SourceError(pub usize);

impl From<SourceError> for HeapError {
    fn from(err: SourceError) -> Self {
        HeapError::Exhausted(err.0)
    }
}
