//! An explicit free list memory allocator with boundary tags, built over a
//! single growable byte arena.
//!
//! The crate implements the textbook allocator design for real: every region
//! of the arena carries a header and footer word, free regions form a
//! circular doubly linked list threaded through their own payloads, and the
//! arena grows by whole pages when nothing on the list fits. What the crate
//! does not do is touch raw pointers to hand out memory. Allocations are
//! identified by byte offsets into the arena, which makes the whole
//! algorithm safe code and keeps handles valid when the backing buffer
//! moves.
//!
//! # Usage
//!
//! Add the crate to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tagheap = "0.1"
//! ```
//!
//! Build a heap over a [`VecSource`] and allocate from it:
//!
//! ```
//! use tagheap::{RawHeap, VecSource};
//!
//! # fn main() -> Result<(), tagheap::HeapError> {
//! let mut heap = RawHeap::with_source(VecSource::with_max(1 << 20))?;
//!
//! let greeting = heap.allocate(13)?.unwrap();
//! heap.payload_mut(greeting)?[..13].copy_from_slice(b"hello, arena!");
//! assert_eq!(&heap.payload(greeting)?[..13], b"hello, arena!");
//!
//! heap.free(greeting)?;
//! # Ok(())
//! # }
//! ```
//!
//! The search and insertion policies and the request ceiling are picked at
//! construction and can be changed later:
//!
//! ```
//! use tagheap::{HeapConfig, Insertion, Placement, RawHeap, VecSource};
//!
//! # fn main() -> Result<(), tagheap::HeapError> {
//! let config = HeapConfig {
//!     placement: Placement::NextFit,
//!     insertion: Insertion::AddressOrdered,
//!     ceiling: 1 << 16,
//! };
//! let mut heap = RawHeap::with_config(VecSource::with_max(1 << 20), config)?;
//! let ptr = heap.allocate(64)?.unwrap();
//! heap.free(ptr)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Mode of operation
//!
//! ## Regions
//!
//! The arena is tiled by regions. A region starts with a one word header
//! and ends with a one word footer holding the same tag word: the region's
//! size, its allocated flag, and the size the caller originally asked for.
//! The footer is what makes freeing cheap. When a region is
//! freed, the word right before its header is its left neighbor's footer,
//! so both neighbors can be inspected and merged in constant time, no
//! matter how large the heap is.
//!
//! Region sizes are multiples of 16 and payloads start at offsets that are
//! multiples of 16. A pad word and a 16 byte prologue region sit at the
//! bottom of the arena and a one word epilogue header sits at the top; both
//! sentinels read as permanently allocated, so the coalescer never has to
//! special-case the arena's ends.
//!
//! ## The free list
//!
//! Free regions form one circular doubly linked list. The links live in the
//! first two payload words of each free region, stored as offsets, so the
//! list costs nothing beyond the regions themselves. Allocation walks the
//! list per the [`Placement`] policy, first fit or next fit, and splits the
//! found region when the leftover is big enough to stand on its own. A
//! freed region is merged with its free neighbors and re-enters the list
//! per the [`Insertion`] policy, at the head or in address order.
//!
//! ## Growth
//!
//! When no region fits, the heap asks its [`HeapSource`] for more bytes,
//! one page or the rounded request, whichever is larger. The old epilogue
//! header becomes the header of the fresh free region and a new epilogue is
//! written at the new top, so growth is just another region appearing and,
//! possibly, merging with a free region that was already at the top.
//!
//! ## Offsets, not pointers
//!
//! Every handle in the API is a [`HeapPtr`], a byte offset into the arena.
//! Sources are free to move their backing memory when they grow, as
//! [`VecSource`] does, and every outstanding handle stays valid. It also
//! means a stale or fabricated handle cannot cause undefined behavior:
//! [`RawHeap::free`] validates the handle against the region metadata and
//! answers with [`HeapError::BadPointer`] or [`HeapError::Corrupted`]
//! instead of trusting it.
//!
//! # Thread safety
//!
//! [`RawHeap`] is single threaded. [`SyncHeap`] wraps it in a [`Mutex`] and
//! exposes the same operations through `&self`, which is the right tool
//! when several threads share one arena.
//!
//! [`Mutex`]: std::sync::Mutex

pub mod heaps;
pub mod sources;

mod arena;
mod error;
mod freelist;
mod tag;
mod util;

pub use crate::error::{HeapError, SourceError};
pub use crate::freelist::Insertion;
pub use crate::heaps::raw_heap::{FreeRegion, HeapConfig, HeapPtr, Placement, RegionInfo};
pub use crate::heaps::{RawHeap, SyncHeap};
#[cfg(unix)]
pub use crate::sources::SbrkSource;
pub use crate::sources::{HeapSource, VecSource};
pub use crate::tag::MAX_REQUEST;
