//! The allocators: the single threaded engine and its lock guarded wrapper.

pub mod raw_heap;
pub mod sync_heap;

pub use raw_heap::RawHeap;
pub use sync_heap::SyncHeap;
