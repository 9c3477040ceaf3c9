//! The managed arena: a [`HeapSource`] buffer carved into regions, walled in
//! by permanently allocated sentinels.
//!
//! Layout from offset zero: one alignment pad word, the 16 byte prologue
//! region (header and footer back to back), the user regions, and the one
//! word epilogue header that always sits at the top of the heap. The
//! sentinels read as allocated, so coalescing never has to special-case the
//! ends of the arena.

use crate::error::SourceError;
use crate::sources::HeapSource;
use crate::tag::{Tag, DOUBLE_WORD, MIN_REGION, WORD};

/// Offset of the prologue header word.
pub(crate) const PROLOGUE: usize = WORD;

/// Offset of the first user region's header. At bootstrap, before any growth,
/// the epilogue sits here instead.
pub(crate) const FIRST_REGION: usize = 3 * WORD;

/// Bytes claimed at bootstrap: pad word, prologue, epilogue header.
const BOOTSTRAP: usize = 4 * WORD;

/// The arena and its position bookkeeping. All region addressing is done
/// with byte offsets into the source buffer, so the buffer is free to move
/// when it grows.
pub(crate) struct Arena<S> {
    source: S,
    epilogue: usize,
}

impl<S: HeapSource> Arena<S> {
    /// Claims the first bytes of a fresh source and plants the sentinels.
    pub fn bootstrap(mut source: S) -> Result<Arena<S>, SourceError> {
        let base = source.grow(BOOTSTRAP)?;
        debug_assert_eq!(base, 0, "the arena needs a fresh source");
        let mut arena = Arena {
            source,
            epilogue: FIRST_REGION,
        };
        arena.put_word(0, 0);
        arena.put_region_tags(PROLOGUE, Tag::allocated(0, DOUBLE_WORD));
        arena.put_tag(FIRST_REGION, Tag::allocated(0, 0));
        Ok(arena)
    }

    /// Arena length in bytes. The epilogue header is always the last word.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Offset of the epilogue header.
    pub fn epilogue(&self) -> usize {
        self.epilogue
    }

    /// Extends the arena by `amount` bytes and returns the header offset of
    /// the free region spanning them.
    ///
    /// The old epilogue header becomes the new region's header and a fresh
    /// epilogue is written at the new top. Nothing is written unless the
    /// source confirms the growth.
    pub fn extend(&mut self, amount: usize) -> Result<usize, SourceError> {
        debug_assert!(amount % DOUBLE_WORD == 0 && amount >= MIN_REGION);
        self.source.grow(amount)?;
        let h = self.epilogue;
        self.put_region_tags(h, Tag::free(amount));
        self.epilogue = h + amount;
        self.put_tag(self.epilogue, Tag::allocated(0, 0));
        debug_assert_eq!(self.epilogue + WORD, self.len());
        Ok(h)
    }

    /// Reads the metadata word at byte offset `at`.
    pub fn word(&self, at: usize) -> u64 {
        debug_assert!(at % WORD == 0);
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.source.bytes()[at..at + WORD]);
        u64::from_ne_bytes(word)
    }

    /// Writes the metadata word at byte offset `at`.
    pub fn put_word(&mut self, at: usize, word: u64) {
        debug_assert!(at % WORD == 0);
        self.source.bytes_mut()[at..at + WORD].copy_from_slice(&word.to_ne_bytes());
    }

    /// Decodes the tag at byte offset `at`.
    pub fn tag(&self, at: usize) -> Tag {
        Tag::decode(self.word(at))
    }

    /// Encodes `tag` into the word at byte offset `at`.
    pub fn put_tag(&mut self, at: usize, tag: Tag) {
        self.put_word(at, tag.encode());
    }

    /// Writes `tag` as both header and footer of the region starting at `h`.
    pub fn put_region_tags(&mut self, h: usize, tag: Tag) {
        let size = tag.region_size();
        debug_assert!(size >= DOUBLE_WORD);
        self.put_tag(h, tag);
        self.put_tag(h + size - WORD, tag);
    }

    /// Header offset of the region after the one at `h`.
    pub fn next_region(&self, h: usize) -> usize {
        debug_assert!(h < self.epilogue);
        h + self.tag(h).region_size()
    }

    /// Header offset of the region before the one at `h`, reached through
    /// the predecessor's footer. The prologue bounds the walk on the left.
    pub fn prev_region(&self, h: usize) -> usize {
        debug_assert!(h >= FIRST_REGION);
        h - self.tag(h - WORD).region_size()
    }

    /// The payload bytes of the region at `h`.
    pub fn payload(&self, h: usize) -> &[u8] {
        let size = self.tag(h).region_size();
        &self.source.bytes()[h + WORD..h + size - WORD]
    }

    /// The payload bytes of the region at `h`, mutably.
    pub fn payload_mut(&mut self, h: usize) -> &mut [u8] {
        let size = self.tag(h).region_size();
        &mut self.source.bytes_mut()[h + WORD..h + size - WORD]
    }

    /// Copies the first `n` payload bytes of the region at `from` into the
    /// payload of the region at `to`.
    pub fn copy_payload(&mut self, from: usize, to: usize, n: usize) {
        debug_assert!(n + DOUBLE_WORD <= self.tag(from).region_size());
        debug_assert!(n + DOUBLE_WORD <= self.tag(to).region_size());
        let src = from + WORD;
        self.source.bytes_mut().copy_within(src..src + n, to + WORD);
    }

    /// Walks the user regions in address order, prologue and epilogue
    /// excluded.
    pub fn regions(&self) -> RegionWalk<'_, S> {
        RegionWalk {
            arena: self,
            at: FIRST_REGION,
        }
    }
}

/// Address-ordered iterator over `(header offset, tag)` pairs.
pub(crate) struct RegionWalk<'a, S> {
    arena: &'a Arena<S>,
    at: usize,
}

impl<S: HeapSource> Iterator for RegionWalk<'_, S> {
    type Item = (usize, Tag);

    fn next(&mut self) -> Option<(usize, Tag)> {
        if self.at >= self.arena.epilogue {
            return None;
        }
        let h = self.at;
        let tag = self.arena.tag(h);
        if tag.region_size() == 0 {
            // A torn size would loop forever; verification reports it.
            return None;
        }
        self.at = h + tag.region_size();
        Some((h, tag))
    }
}
