//! The explicit free list, threaded through the payloads of free regions.
//!
//! Each free region lends its first two payload words to the list: the
//! forward link at one word past the header, the back link one word after
//! that. Links are header offsets stored as plain words, so the list lives
//! entirely inside the arena and costs no memory of its own.

use crate::arena::{Arena, FIRST_REGION};
use crate::sources::HeapSource;
use crate::tag::WORD;

/// Where a freed or merged region enters the free list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Insertion {
    /// Splice at the head. The most recently freed region is examined first.
    #[default]
    Lifo,
    /// Keep the list in ascending address order. Insertion walks the list,
    /// so it costs O(members) instead of O(1).
    AddressOrdered,
}

/// The free list: circular, doubly linked, and never empty in the pointer
/// sense.
///
/// `head` and `cursor` are header offsets. While the list has no members
/// both alias the arena's epilogue header. The epilogue is permanently
/// allocated, so emptiness is tested through the head's allocated flag
/// rather than with a sentinel value.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: usize,
    cursor: usize,
    insertion: Insertion,
}

impl FreeList {
    pub fn new(epilogue: usize, insertion: Insertion) -> FreeList {
        FreeList {
            head: epilogue,
            cursor: epilogue,
            insertion,
        }
    }

    pub fn head(&self) -> usize {
        self.head
    }

    /// The roving start position used by next fit searches. Always a member
    /// while the list is nonempty, the epilogue alias otherwise.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, at: usize) {
        self.cursor = at;
    }

    pub fn insertion(&self) -> Insertion {
        self.insertion
    }

    /// Re-aims an empty list at a relocated epilogue. Growth moves the
    /// epilogue header, and an empty list must keep aliasing it.
    pub fn alias_epilogue(&mut self, epilogue: usize) {
        self.head = epilogue;
        self.cursor = epilogue;
    }

    pub fn is_empty<S: HeapSource>(&self, arena: &Arena<S>) -> bool {
        arena.tag(self.head).is_allocated()
    }

    /// The forward link of the member at `h`.
    pub fn forward<S: HeapSource>(arena: &Arena<S>, h: usize) -> usize {
        arena.word(h + WORD) as usize
    }

    /// The back link of the member at `h`.
    pub fn back<S: HeapSource>(arena: &Arena<S>, h: usize) -> usize {
        arena.word(h + 2 * WORD) as usize
    }

    fn set_forward<S: HeapSource>(arena: &mut Arena<S>, h: usize, to: usize) {
        arena.put_word(h + WORD, to as u64);
    }

    fn set_back<S: HeapSource>(arena: &mut Arena<S>, h: usize, to: usize) {
        arena.put_word(h + 2 * WORD, to as u64);
    }

    /// Links the free region at `h` into the list per the insertion policy.
    pub fn insert<S: HeapSource>(&mut self, arena: &mut Arena<S>, h: usize) {
        debug_assert!(arena.tag(h).is_free());
        if self.is_empty(arena) {
            Self::set_forward(arena, h, h);
            Self::set_back(arena, h, h);
            self.head = h;
            self.cursor = h;
            return;
        }
        match self.insertion {
            Insertion::Lifo => {
                let head = self.head;
                Self::splice_before(arena, head, h);
                self.head = h;
            }
            Insertion::AddressOrdered => {
                // Find the first member past `h`; wrapping around to the
                // head instead means `h` becomes the new tail.
                let mut after = self.head;
                loop {
                    if h < after {
                        break;
                    }
                    let next = Self::forward(arena, after);
                    if next == self.head {
                        after = self.head;
                        break;
                    }
                    after = next;
                }
                Self::splice_before(arena, after, h);
                if h < self.head {
                    self.head = h;
                }
            }
        }
    }

    fn splice_before<S: HeapSource>(arena: &mut Arena<S>, after: usize, h: usize) {
        let before = Self::back(arena, after);
        Self::set_forward(arena, h, after);
        Self::set_back(arena, h, before);
        Self::set_forward(arena, before, h);
        Self::set_back(arena, after, h);
    }

    /// Unlinks the member at `h`. The head and cursor are moved along if
    /// they pointed at it, and an emptied list goes back to aliasing the
    /// epilogue.
    pub fn remove<S: HeapSource>(&mut self, arena: &mut Arena<S>, h: usize) {
        let next = Self::forward(arena, h);
        if next == h {
            debug_assert_eq!(self.head, h);
            self.head = arena.epilogue();
            self.cursor = arena.epilogue();
            return;
        }
        let prev = Self::back(arena, h);
        Self::set_forward(arena, prev, next);
        Self::set_back(arena, next, prev);
        if self.head == h {
            self.head = next;
        }
        if self.cursor == h {
            self.cursor = next;
        }
    }

    /// Splices `new` into the exact list position of `old`, which leaves
    /// the list. Used when a split's leftover takes over its region's spot.
    /// Relative order is preserved: the leftover starts inside the old
    /// region's span, below any other member that follows it.
    pub fn replace<S: HeapSource>(&mut self, arena: &mut Arena<S>, old: usize, new: usize) {
        let next = Self::forward(arena, old);
        if next == old {
            Self::set_forward(arena, new, new);
            Self::set_back(arena, new, new);
        } else {
            let prev = Self::back(arena, old);
            Self::set_forward(arena, new, next);
            Self::set_back(arena, new, prev);
            Self::set_forward(arena, prev, new);
            Self::set_back(arena, next, new);
        }
        if self.head == old {
            self.head = new;
        }
        if self.cursor == old {
            self.cursor = new;
        }
    }

    /// Switches the insertion policy. Moving to address ordering relinks
    /// every free region in one pass over the arena; moving to LIFO keeps
    /// the current links, since any order is a valid LIFO state.
    pub fn set_insertion<S: HeapSource>(&mut self, arena: &mut Arena<S>, insertion: Insertion) {
        self.insertion = insertion;
        if insertion == Insertion::AddressOrdered {
            self.rebuild(arena);
        }
    }

    /// Relinks the list in ascending address order by walking the regions.
    fn rebuild<S: HeapSource>(&mut self, arena: &mut Arena<S>) {
        let mut first = None;
        let mut prev: Option<usize> = None;
        let mut h = FIRST_REGION;
        while h != arena.epilogue() {
            let tag = arena.tag(h);
            if tag.is_free() {
                match prev {
                    None => first = Some(h),
                    Some(p) => {
                        Self::set_forward(arena, p, h);
                        Self::set_back(arena, h, p);
                    }
                }
                prev = Some(h);
            }
            h += tag.region_size();
        }
        match (first, prev) {
            (Some(first), Some(last)) => {
                Self::set_forward(arena, last, first);
                Self::set_back(arena, first, last);
                self.head = first;
                self.cursor = first;
            }
            _ => self.alias_epilogue(arena.epilogue()),
        }
    }

    /// Iterates the members in list order, starting at the head.
    pub fn iter<'a, S: HeapSource>(&self, arena: &'a Arena<S>) -> ListIter<'a, S> {
        ListIter {
            arena,
            head: self.head,
            at: (!self.is_empty(arena)).then_some(self.head),
        }
    }
}

/// List-order iterator over member header offsets.
pub(crate) struct ListIter<'a, S> {
    arena: &'a Arena<S>,
    head: usize,
    at: Option<usize>,
}

impl<S: HeapSource> Iterator for ListIter<'_, S> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let h = self.at?;
        let next = FreeList::forward(self.arena, h);
        self.at = (next != self.head).then_some(next);
        Some(h)
    }
}
