//! A lock guarded heap that can be shared across threads.

use core::fmt;
use std::sync::Mutex;

use crate::error::HeapError;
use crate::heaps::raw_heap::{FreeRegion, HeapConfig, HeapPtr, RawHeap, RegionInfo};
use crate::sources::HeapSource;

/// A thread safe heap: a [`RawHeap`] behind one [`Mutex`].
///
/// Every operation holds the lock for its whole duration, payload closures
/// included, so callers see the heap transition atomically from one
/// consistent state to the next. Handles are plain offsets and stay valid
/// across threads: an allocation made on one thread can be freed on another.
pub struct SyncHeap<S: HeapSource> {
    inner: Mutex<RawHeap<S>>,
}

impl<S: HeapSource> fmt::Debug for SyncHeap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHeap").field("inner", &self.inner).finish()
    }
}

impl<S: HeapSource> SyncHeap<S> {
    /// Creates a heap over `source` with the default configuration.
    pub fn with_source(source: S) -> Result<SyncHeap<S>, HeapError> {
        Ok(SyncHeap {
            inner: Mutex::new(RawHeap::with_source(source)?),
        })
    }

    /// Creates a heap with explicit policies and ceiling.
    pub fn with_config(source: S, config: HeapConfig) -> Result<SyncHeap<S>, HeapError> {
        Ok(SyncHeap {
            inner: Mutex::new(RawHeap::with_config(source, config)?),
        })
    }

    pub fn allocate(&self, size: usize) -> Result<Option<HeapPtr>, HeapError> {
        self.inner.lock().unwrap().allocate(size)
    }

    pub fn zero_allocate(&self, count: usize, size: usize) -> Result<Option<HeapPtr>, HeapError> {
        self.inner.lock().unwrap().zero_allocate(count, size)
    }

    pub fn reallocate(&self, ptr: HeapPtr, size: usize) -> Result<Option<HeapPtr>, HeapError> {
        self.inner.lock().unwrap().reallocate(ptr, size)
    }

    pub fn free(&self, ptr: HeapPtr) -> Result<(), HeapError> {
        self.inner.lock().unwrap().free(ptr)
    }

    /// Runs `f` over the payload of a live allocation, under the lock.
    pub fn with_payload<R>(
        &self,
        ptr: HeapPtr,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, HeapError> {
        let heap = self.inner.lock().unwrap();
        heap.payload(ptr).map(f)
    }

    /// Runs `f` over the payload of a live allocation, mutably, under the
    /// lock.
    pub fn with_payload_mut<R>(
        &self,
        ptr: HeapPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, HeapError> {
        let mut heap = self.inner.lock().unwrap();
        heap.payload_mut(ptr).map(f)
    }

    pub fn heap_size(&self) -> usize {
        self.inner.lock().unwrap().heap_size()
    }

    /// The free list members in list order, collected under the lock.
    pub fn free_regions(&self) -> Vec<FreeRegion> {
        self.inner.lock().unwrap().free_regions().collect()
    }

    /// Every user region in address order, collected under the lock.
    pub fn regions(&self) -> Vec<RegionInfo> {
        self.inner.lock().unwrap().regions().collect()
    }

    pub fn verify(&self) -> Result<(), HeapError> {
        self.inner.lock().unwrap().verify()
    }
}
