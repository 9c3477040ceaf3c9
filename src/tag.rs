//! Boundary tags: the [`Tag`] record and its one-word encoding.
//!
//! Every region of the arena starts with a header word and ends with a footer
//! word holding identical [`Tag`] values. The footer lets a region's successor
//! reach the region's header in O(1), which is what makes constant-time
//! coalescing with the left neighbor possible.

use static_assertions::const_assert;

use crate::util::round_up;

/// Size in bytes of one metadata word. Headers and footers are one word each.
pub(crate) const WORD: usize = 8;

/// Two words. Payloads are aligned to this, and region sizes are multiples of
/// it.
pub(crate) const DOUBLE_WORD: usize = 16;

/// Smallest region that can stand on its own: header and footer plus the two
/// payload words a free region lends to the free list links.
pub(crate) const MIN_REGION: usize = 2 * WORD + DOUBLE_WORD;

/// Largest request a heap will accept. Anything above this would need a
/// region size that no longer fits the tag's size field.
pub const MAX_REQUEST: usize = 0xFFFF_FFE0;

const SIZE_MASK: u64 = 0xFFFF_FFF8;
const ALLOCATED_BIT: u64 = 0x1;
const RESERVED_BITS: u64 = 0x6;

const_assert!(MIN_REGION % DOUBLE_WORD == 0);
const_assert!(MAX_REQUEST % DOUBLE_WORD == 0);
const_assert!((MAX_REQUEST + DOUBLE_WORD) as u64 <= SIZE_MASK);

/// Decoded contents of a header or footer word.
///
/// The wire form packs three facts into 64 bits: the caller's original
/// request in bits 63..32 (kept for diagnostics only), the full region size
/// in bits 31..3 (the low three bits of the size are always zero and are
/// reused), and the allocated flag in bit 0. Bits 1 and 2 are reserved and
/// stay zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag {
    requested: u32,
    size: u32,
    allocated: bool,
}

impl Tag {
    /// Creates the tag of an allocated region.
    ///
    /// # Panics
    /// In debug builds, panics if `size` is not a multiple of
    /// [`DOUBLE_WORD`], if it overflows the size field, or if `requested`
    /// exceeds [`MAX_REQUEST`].
    pub fn allocated(requested: usize, size: usize) -> Tag {
        debug_assert!(size % DOUBLE_WORD == 0);
        debug_assert!(size as u64 <= SIZE_MASK);
        debug_assert!(requested <= MAX_REQUEST);
        Tag {
            requested: requested as u32,
            size: size as u32,
            allocated: true,
        }
    }

    /// Creates the tag of a free region. Free regions carry no request size.
    pub fn free(size: usize) -> Tag {
        debug_assert!(size % DOUBLE_WORD == 0 && size >= MIN_REGION);
        debug_assert!(size as u64 <= SIZE_MASK);
        Tag {
            requested: 0,
            size: size as u32,
            allocated: false,
        }
    }

    /// Decodes a header or footer word.
    ///
    /// # Panics
    /// In debug builds, panics if the reserved bits are set or the size is
    /// not a multiple of [`DOUBLE_WORD`]. Release builds decode whatever is
    /// there; the heap's validation paths catch torn tags instead.
    pub fn decode(word: u64) -> Tag {
        debug_assert!(word & RESERVED_BITS == 0);
        let size = word & SIZE_MASK;
        debug_assert!(size % DOUBLE_WORD as u64 == 0);
        Tag {
            requested: (word >> 32) as u32,
            size: size as u32,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    /// Decodes a word that may not hold a tag at all. `None` means the word
    /// cannot be a tag: its reserved bits are set or its size field is not a
    /// multiple of [`DOUBLE_WORD`]. The heap's validation paths use this on
    /// caller supplied offsets, where the word may be arbitrary payload.
    pub fn try_decode(word: u64) -> Option<Tag> {
        if word & RESERVED_BITS != 0 {
            return None;
        }
        let size = word & SIZE_MASK;
        if size % DOUBLE_WORD as u64 != 0 {
            return None;
        }
        Some(Tag {
            requested: (word >> 32) as u32,
            size: size as u32,
            allocated: word & ALLOCATED_BIT != 0,
        })
    }

    /// Encodes the tag into its one-word form.
    pub fn encode(self) -> u64 {
        ((self.requested as u64) << 32) | self.size as u64 | self.allocated as u64
    }

    /// The caller's original request in bytes. Zero for free regions and
    /// sentinels.
    pub fn requested_size(self) -> usize {
        self.requested as usize
    }

    /// The full region size in bytes, header and footer included.
    pub fn region_size(self) -> usize {
        self.size as usize
    }

    pub fn is_allocated(self) -> bool {
        self.allocated
    }

    pub fn is_free(self) -> bool {
        !self.allocated
    }
}

/// The region size that serves a request of `requested` bytes: the request
/// rounded up to a [`DOUBLE_WORD`] multiple, plus one [`DOUBLE_WORD`] for the
/// header and footer.
pub(crate) fn region_size_for(requested: usize) -> usize {
    debug_assert!(requested > 0 && requested <= MAX_REQUEST);
    round_up(requested, DOUBLE_WORD).expect("request below the ceiling cannot overflow")
        + DOUBLE_WORD
}
