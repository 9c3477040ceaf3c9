//! A single threaded allocator over a growable arena.
//!
//! [`RawHeap`] owns an [`Arena`] and an explicit free list and implements the
//! classic boundary tag algorithm on top of them: allocation searches the
//! free list per the placement policy, splits when the leftover can stand on
//! its own, and grows the arena by whole pages when nothing fits. Freeing
//! validates the handle, merges the region with any free physical neighbor,
//! and links the result back per the insertion policy.
//!
//! The heap is not [`Sync`]; wrap it in
//! [`SyncHeap`](crate::heaps::SyncHeap) to share it across threads.

use core::cmp::Ordering;
use core::fmt;

use static_assertions::const_assert;
use tracing::{debug, instrument, Level};

use crate::arena::{Arena, FIRST_REGION};
use crate::error::HeapError;
use crate::freelist::{FreeList, Insertion};
use crate::sources::HeapSource;
use crate::tag::{region_size_for, Tag, DOUBLE_WORD, MAX_REQUEST, MIN_REGION, WORD};
use crate::util::round_up;

/// Unit of arena growth. A request larger than a page grows the arena by the
/// request rounded up to whole pages.
const PAGE_SIZE: usize = 4096;

const_assert!(PAGE_SIZE % DOUBLE_WORD == 0);
const_assert!(PAGE_SIZE >= MIN_REGION);

/// How the heap searches the free list for a region that fits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    /// Walk from the head and take the first fitting region.
    #[default]
    FirstFit,
    /// Resume from where the previous search stopped. Spreads allocations
    /// over the list instead of churning its head.
    NextFit,
}

/// Construction time knobs of a heap.
#[derive(Clone, Copy, Debug)]
pub struct HeapConfig {
    pub placement: Placement,
    pub insertion: Insertion,
    /// Largest accepted request in bytes. Clamped to [`MAX_REQUEST`].
    pub ceiling: usize,
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig {
            placement: Placement::default(),
            insertion: Insertion::default(),
            ceiling: MAX_REQUEST,
        }
    }
}

/// Handle to a live allocation: the byte offset of its payload within the
/// arena. Handed out by the allocating calls and spent by [`RawHeap::free`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPtr(pub(crate) usize);

impl HeapPtr {
    /// The payload's byte offset into the arena. Always a multiple of 16.
    pub fn offset(self) -> usize {
        self.0
    }
}

impl fmt::Debug for HeapPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapPtr({:#x})", self.0)
    }
}

/// A free list member, as reported by [`RawHeap::free_regions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeRegion {
    /// Header offset of the region.
    pub offset: usize,
    /// Full region size in bytes.
    pub size: usize,
}

/// One region of the arena walk reported by [`RawHeap::regions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionInfo {
    /// Header offset of the region.
    pub offset: usize,
    /// Full region size in bytes, header and footer included.
    pub size: usize,
    /// The caller's original request. Zero for free regions.
    pub requested: usize,
    pub allocated: bool,
}

/// The single threaded allocator engine.
pub struct RawHeap<S: HeapSource> {
    arena: Arena<S>,
    freelist: FreeList,
    placement: Placement,
    ceiling: usize,
}

impl<S: HeapSource> fmt::Debug for RawHeap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawHeap")
            .field("heap_size", &self.arena.len())
            .field("placement", &self.placement)
            .field("freelist", &self.freelist)
            .finish()
    }
}

impl<S: HeapSource> RawHeap<S> {
    /// Creates a heap over `source` with the default configuration: first
    /// fit, LIFO insertion, the ceiling at [`MAX_REQUEST`].
    ///
    /// The arena bootstraps eagerly, so the source grows by the 32 bytes
    /// the sentinels need before this returns.
    pub fn with_source(source: S) -> Result<RawHeap<S>, HeapError> {
        Self::with_config(source, HeapConfig::default())
    }

    /// Creates a heap with explicit policies and ceiling.
    pub fn with_config(source: S, config: HeapConfig) -> Result<RawHeap<S>, HeapError> {
        let arena = Arena::bootstrap(source)?;
        let freelist = FreeList::new(arena.epilogue(), config.insertion);
        Ok(RawHeap {
            arena,
            freelist,
            placement: config.placement,
            ceiling: config.ceiling.min(MAX_REQUEST),
        })
    }

    /// Allocates `size` bytes and returns a handle to the payload, or
    /// `Ok(None)` for a zero sized request.
    ///
    /// The payload offset is a multiple of 16 and the usable payload spans
    /// at least `size` bytes.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn allocate(&mut self, size: usize) -> Result<Option<HeapPtr>, HeapError> {
        if size == 0 {
            debug!("zero size request, nothing to do");
            return Ok(None);
        }
        if size > self.ceiling {
            return Err(HeapError::TooLarge {
                requested: size,
                ceiling: self.ceiling,
            });
        }
        self.allocate_sized(size).map(Some)
    }

    /// Allocates `count * size` bytes and zero fills the whole payload.
    /// `Ok(None)` when either factor is zero.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn zero_allocate(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<Option<HeapPtr>, HeapError> {
        if count == 0 || size == 0 {
            debug!("empty zero allocation, nothing to do");
            return Ok(None);
        }
        let total = count
            .checked_mul(size)
            .ok_or(HeapError::Overflow { count, size })?;
        if total > self.ceiling {
            return Err(HeapError::TooLarge {
                requested: total,
                ceiling: self.ceiling,
            });
        }
        let ptr = self.allocate_sized(total)?;
        self.arena.payload_mut(ptr.offset() - WORD).fill(0);
        Ok(Some(ptr))
    }

    /// Resizes the allocation at `ptr` to `size` bytes, preserving the
    /// payload up to the smaller of the two sizes.
    ///
    /// Shrinking stays in place and returns the same handle; a trimmed tail
    /// large enough to stand alone is freed and coalesced. Growing moves the
    /// allocation and frees the old region. A zero `size` frees nothing and
    /// returns `Ok(None)`; on any error the original allocation is intact.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn reallocate(&mut self, ptr: HeapPtr, size: usize) -> Result<Option<HeapPtr>, HeapError> {
        if size == 0 {
            debug!("zero size reallocation, nothing to do");
            return Ok(None);
        }
        if size > self.ceiling {
            return Err(HeapError::TooLarge {
                requested: size,
                ceiling: self.ceiling,
            });
        }
        let h = self.locate(ptr)?;
        let old = self.arena.tag(h);
        let adjusted = region_size_for(size);
        if adjusted <= old.region_size() {
            return Ok(Some(HeapPtr(self.shrink(h, adjusted, size))));
        }
        // Allocate first and free last. The reverse order would let the
        // coalescer's link words land in the first two payload words
        // before they are copied out.
        let new = self.allocate_sized(size)?;
        let n = (old.region_size() - DOUBLE_WORD).min(size);
        self.arena.copy_payload(h, new.offset() - WORD, n);
        self.release(h);
        Ok(Some(new))
    }

    /// Frees the allocation at `ptr`.
    ///
    /// The handle is validated by walking the regions: it must name the
    /// payload start of a live allocation with agreeing tags.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn free(&mut self, ptr: HeapPtr) -> Result<(), HeapError> {
        let h = self.locate(ptr)?;
        self.release(h);
        Ok(())
    }

    /// Shared access to the payload of a live allocation. The slice spans
    /// the whole region payload, which may round past the requested size.
    pub fn payload(&self, ptr: HeapPtr) -> Result<&[u8], HeapError> {
        let h = self.check_ptr(ptr)?;
        Ok(self.arena.payload(h))
    }

    /// Mutable access to the payload of a live allocation.
    pub fn payload_mut(&mut self, ptr: HeapPtr) -> Result<&mut [u8], HeapError> {
        let h = self.check_ptr(ptr)?;
        Ok(self.arena.payload_mut(h))
    }

    /// Total arena length in bytes, sentinels included.
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn insertion(&self) -> Insertion {
        self.freelist.insertion()
    }

    /// Largest request this heap accepts.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Switches the placement policy. Takes effect on the next search.
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    /// Switches the insertion policy. Moving to address ordering relinks
    /// the whole free list into ascending address order in one pass.
    pub fn set_insertion(&mut self, insertion: Insertion) {
        self.freelist.set_insertion(&mut self.arena, insertion);
    }

    /// The free list members in list order, head first.
    pub fn free_regions(&self) -> impl Iterator<Item = FreeRegion> + '_ {
        self.freelist.iter(&self.arena).map(|offset| FreeRegion {
            offset,
            size: self.arena.tag(offset).region_size(),
        })
    }

    /// Every user region in address order, allocated and free alike.
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        self.arena.regions().map(|(offset, tag)| RegionInfo {
            offset,
            size: tag.region_size(),
            requested: tag.requested_size(),
            allocated: tag.is_allocated(),
        })
    }

    /// Checks the whole heap for consistency: every region's tags agree,
    /// region sizes tile the arena, the free list is circular with intact
    /// back links, its membership is exactly the set of free regions, and
    /// the cursor points at a member. Returns the offset of the first
    /// failed check.
    ///
    /// Never panics, whatever state the arena bytes are in.
    pub fn verify(&self) -> Result<(), HeapError> {
        let mut free_count = 0usize;
        let mut h = FIRST_REGION;
        while h != self.arena.epilogue() {
            let tag = match Tag::try_decode(self.arena.word(h)) {
                Some(tag) => tag,
                None => return Err(HeapError::Corrupted(h)),
            };
            let size = tag.region_size();
            if size < MIN_REGION || h + size > self.arena.epilogue() {
                return Err(HeapError::Corrupted(h));
            }
            match Tag::try_decode(self.arena.word(h + size - WORD)) {
                Some(footer) if footer == tag => {}
                _ => return Err(HeapError::Corrupted(h)),
            }
            if tag.is_free() {
                free_count += 1;
            }
            h += size;
        }
        if self.freelist.is_empty(&self.arena) {
            return match free_count {
                0 => Ok(()),
                _ => Err(HeapError::Corrupted(self.freelist.head())),
            };
        }
        let head = self.freelist.head();
        let mut cursor_seen = false;
        let mut at = head;
        for _ in 0..free_count {
            if at < FIRST_REGION || at + MIN_REGION > self.arena.epilogue() || at % WORD != 0 {
                return Err(HeapError::Corrupted(at));
            }
            match Tag::try_decode(self.arena.word(at)) {
                Some(tag) if tag.is_free() => {}
                _ => return Err(HeapError::Corrupted(at)),
            }
            cursor_seen |= at == self.freelist.cursor();
            let next = FreeList::forward(&self.arena, at);
            if next < FIRST_REGION || next % WORD != 0 || next + 3 * WORD > self.arena.len() {
                return Err(HeapError::Corrupted(at));
            }
            if FreeList::back(&self.arena, next) != at {
                return Err(HeapError::Corrupted(at));
            }
            at = next;
        }
        if at != head || !cursor_seen {
            return Err(HeapError::Corrupted(at));
        }
        Ok(())
    }

    /// Allocation after the zero size and ceiling gates.
    #[instrument(level = "debug")]
    fn allocate_sized(&mut self, size: usize) -> Result<HeapPtr, HeapError> {
        let adjusted = region_size_for(size);
        let h = match self.find_fit(adjusted) {
            Some(h) => h,
            None => {
                debug!(adjusted, "no fit on the free list, growing the arena");
                self.grow_arena(adjusted)?
            }
        };
        // The next fit cursor resumes right after the consumed region.
        // Placement repairs it again if a leftover takes the region's spot.
        let next = FreeList::forward(&self.arena, h);
        self.freelist.set_cursor(next);
        Ok(HeapPtr(self.place(h, adjusted, size)))
    }

    /// Searches the free list for a region of at least `adjusted` bytes.
    fn find_fit(&self, adjusted: usize) -> Option<usize> {
        if self.freelist.is_empty(&self.arena) {
            return None;
        }
        let start = match self.placement {
            Placement::FirstFit => self.freelist.head(),
            Placement::NextFit => self.freelist.cursor(),
        };
        let mut h = start;
        loop {
            let tag = self.arena.tag(h);
            debug_assert!(tag.is_free(), "free list member carries a free tag");
            if tag.region_size() >= adjusted {
                debug!(region = h, size = tag.region_size(), adjusted, "found a fit");
                return Some(h);
            }
            h = FreeList::forward(&self.arena, h);
            if h == start {
                return None;
            }
        }
    }

    /// Grows the arena enough to serve an `adjusted` byte region and
    /// returns the header of the free region that resulted, already merged
    /// with a free top region if there was one.
    #[instrument(level = "debug", err(Debug, level = Level::ERROR))]
    fn grow_arena(&mut self, adjusted: usize) -> Result<usize, HeapError> {
        let amount = round_up(adjusted.max(PAGE_SIZE), PAGE_SIZE)
            .expect("page rounding a bounded request cannot overflow");
        let was_empty = self.freelist.is_empty(&self.arena);
        let h = self.arena.extend(amount)?;
        if was_empty {
            // The old epilogue offset now heads the fresh region. An empty
            // list must alias the new epilogue before any linking.
            self.freelist.alias_epilogue(self.arena.epilogue());
        }
        debug!(amount, region = h, heap_size = self.arena.len(), "arena grown");
        Ok(self.coalesce(h))
    }

    /// Converts the free region at `h` into an allocated region of
    /// `adjusted` bytes and returns the payload offset. A leftover big
    /// enough to stand alone splits off and takes over the region's list
    /// position; anything smaller stays absorbed in the allocation.
    #[instrument(level = "debug")]
    fn place(&mut self, h: usize, adjusted: usize, requested: usize) -> usize {
        let region = self.arena.tag(h);
        debug_assert!(region.is_free() && region.region_size() >= adjusted);
        let spare = region.region_size() - adjusted;
        if spare > MIN_REGION {
            let leftover = h + adjusted;
            // Links move before any tag is rewritten; the splice reads the
            // region's own link words.
            self.freelist.replace(&mut self.arena, h, leftover);
            self.arena.put_region_tags(h, Tag::allocated(requested, adjusted));
            self.arena.put_region_tags(leftover, Tag::free(spare));
            debug!(region = h, adjusted, leftover, spare, "split the region");
        } else {
            self.freelist.remove(&mut self.arena, h);
            self.arena
                .put_region_tags(h, Tag::allocated(requested, region.region_size()));
            if spare > 0 {
                debug!(region = h, widened = region.region_size(), "absorbed the undersized leftover");
            }
        }
        h + WORD
    }

    /// Frees the already validated region at `h`.
    fn release(&mut self, h: usize) {
        let size = self.arena.tag(h).region_size();
        // Retag first; the coalescer writes the links when it re-inserts.
        self.arena.put_region_tags(h, Tag::free(size));
        self.coalesce(h);
    }

    /// Merges the free region at `h` with whichever physical neighbors are
    /// free, links the result per the insertion policy, and returns its
    /// header offset. The sentinels guarantee both neighbor tags exist, so
    /// all four neighbor states reduce to two independent checks.
    #[instrument(level = "debug")]
    fn coalesce(&mut self, h: usize) -> usize {
        let tag = self.arena.tag(h);
        debug_assert!(tag.is_free());
        let mut start = h;
        let mut size = tag.region_size();
        let next = self.arena.next_region(h);
        if self.arena.tag(next).is_free() {
            self.freelist.remove(&mut self.arena, next);
            size += self.arena.tag(next).region_size();
        }
        if self.arena.tag(h - WORD).is_free() {
            let prev = self.arena.prev_region(h);
            self.freelist.remove(&mut self.arena, prev);
            size += self.arena.tag(prev).region_size();
            start = prev;
        }
        if start != h || size != tag.region_size() {
            debug!(merged = start, size, "merged adjacent free regions");
        }
        self.arena.put_region_tags(start, Tag::free(size));
        self.freelist.insert(&mut self.arena, start);
        start
    }

    /// Shrinks (or retags at equal region size) the allocation at `h` in
    /// place. A trimmed tail big enough to stand alone becomes a free
    /// region and is coalesced; a smaller tail stays absorbed.
    #[instrument(level = "debug")]
    fn shrink(&mut self, h: usize, adjusted: usize, requested: usize) -> usize {
        let total = self.arena.tag(h).region_size();
        let spare = total - adjusted;
        if spare > MIN_REGION {
            self.arena.put_region_tags(h, Tag::allocated(requested, adjusted));
            let trimmed = h + adjusted;
            self.arena.put_region_tags(trimmed, Tag::free(spare));
            self.coalesce(trimmed);
            debug!(region = h, spare, "trimmed the tail into a free region");
        } else {
            self.arena.put_region_tags(h, Tag::allocated(requested, total));
        }
        h + WORD
    }

    /// Validates a caller supplied handle by walking the regions. Returns
    /// the header offset of the allocation whose payload starts at the
    /// handle.
    fn locate(&self, ptr: HeapPtr) -> Result<usize, HeapError> {
        let at = ptr.offset();
        if at < FIRST_REGION + WORD || at >= self.arena.epilogue() {
            return Err(HeapError::BadPointer(at));
        }
        let mut h = FIRST_REGION;
        while h != self.arena.epilogue() {
            let tag = self.arena.tag(h);
            let size = tag.region_size();
            if size < MIN_REGION || h + size > self.arena.epilogue() {
                return Err(HeapError::Corrupted(h));
            }
            match (h + WORD).cmp(&at) {
                Ordering::Less => h += size,
                Ordering::Equal => {
                    if tag.is_free() {
                        return Err(HeapError::BadPointer(at));
                    }
                    if self.arena.tag(h + size - WORD) != tag {
                        return Err(HeapError::Corrupted(h));
                    }
                    return Ok(h);
                }
                // Walked past the offset: it points into the middle of a
                // region, not at a payload start.
                Ordering::Greater => return Err(HeapError::BadPointer(at)),
            }
        }
        Err(HeapError::BadPointer(at))
    }

    /// O(1) handle check used by the payload accessors: bounds, alignment,
    /// the allocated flag, and header/footer agreement. Works on arbitrary
    /// offsets without panicking, so the header candidate is decoded
    /// fallibly.
    fn check_ptr(&self, ptr: HeapPtr) -> Result<usize, HeapError> {
        let at = ptr.offset();
        if at < FIRST_REGION + WORD || at >= self.arena.epilogue() || at % DOUBLE_WORD != 0 {
            return Err(HeapError::BadPointer(at));
        }
        let h = at - WORD;
        let tag = match Tag::try_decode(self.arena.word(h)) {
            Some(tag) => tag,
            None => return Err(HeapError::BadPointer(at)),
        };
        if tag.is_free() {
            return Err(HeapError::BadPointer(at));
        }
        let size = tag.region_size();
        if size < MIN_REGION || h + size > self.arena.epilogue() {
            return Err(HeapError::Corrupted(h));
        }
        match Tag::try_decode(self.arena.word(h + size - WORD)) {
            Some(footer) if footer == tag => Ok(h),
            _ => Err(HeapError::Corrupted(h)),
        }
    }
}

#[cfg(test)]
mod tests;
