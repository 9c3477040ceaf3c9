//! Heap sources: the growth primitive behind the arena.
//!
//! A [`HeapSource`] is a contiguous byte buffer that can only grow. The heap
//! addresses it purely through byte offsets, so a source is free to move its
//! backing memory when it grows as long as the contents come along.
//! [`VecSource`] keeps the arena in a `Vec` and is the right choice almost
//! everywhere; [`SbrkSource`] claims memory from the process data segment the
//! way classic `malloc` implementations do.

use crate::error::SourceError;

/// A contiguous, growable byte buffer backing an arena.
///
/// Implementations must hand back the buffer's previous length from
/// [`grow`](HeapSource::grow) and must preserve already-written bytes across
/// growth, even when the backing memory moves.
pub trait HeapSource {
    /// Extends the buffer by exactly `n` bytes and returns the offset of the
    /// previous top, which is where the fresh bytes start. Growing by zero
    /// bytes succeeds and returns the current length.
    ///
    /// On failure the buffer is unchanged.
    fn grow(&mut self, n: usize) -> Result<usize, SourceError>;

    /// Current buffer length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The buffer contents.
    fn bytes(&self) -> &[u8];

    /// The buffer contents, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Backing storage unit of [`VecSource`]. Aligning the chunks aligns the
/// arena base, which in turn puts every payload on a 16 byte address.
#[derive(Clone, Copy, Debug)]
#[repr(C, align(16))]
struct Chunk([u8; 16]);

const CHUNK: usize = core::mem::size_of::<Chunk>();

/// A source that keeps the arena in ordinary heap memory, up to a fixed byte
/// budget. Fresh bytes are zero-filled.
#[derive(Debug)]
pub struct VecSource {
    chunks: Vec<Chunk>,
    len: usize,
    max: usize,
}

impl VecSource {
    /// Creates a source that may grow up to `max` bytes.
    pub fn with_max(max: usize) -> VecSource {
        VecSource {
            chunks: Vec::new(),
            len: 0,
            max,
        }
    }

    /// The byte budget this source was created with.
    pub fn max(&self) -> usize {
        self.max
    }
}

impl HeapSource for VecSource {
    fn grow(&mut self, n: usize) -> Result<usize, SourceError> {
        if n == 0 {
            return Ok(self.len);
        }
        let new_len = self
            .len
            .checked_add(n)
            .filter(|&len| len <= self.max)
            .ok_or(SourceError(n))?;
        self.chunks.resize(new_len.div_ceil(CHUNK), Chunk([0; CHUNK]));
        let old_top = self.len;
        self.len = new_len;
        Ok(old_top)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `Chunk` is a plain byte array and `len` never exceeds the
        // chunks' total size.
        unsafe { core::slice::from_raw_parts(self.chunks.as_ptr().cast::<u8>(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and the borrow is exclusive.
        unsafe { core::slice::from_raw_parts_mut(self.chunks.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

#[cfg(unix)]
pub use self::sbrk::SbrkSource;

#[cfg(unix)]
mod sbrk {
    use core::ffi::c_void;
    use core::ptr::NonNull;

    use libc::{brk, sbrk};

    use super::HeapSource;
    use crate::error::SourceError;
    use crate::tag::DOUBLE_WORD;
    use crate::util::round_up;

    /// A source that claims memory by moving the program break.
    ///
    /// The base is found lazily on the first real growth: the current break,
    /// rounded up to a 16 byte address. The slack below the aligned base is
    /// claimed together with the first extension.
    #[derive(Debug)]
    pub struct SbrkSource {
        base: Option<NonNull<u8>>,
        len: usize,
        max: usize,
    }

    impl SbrkSource {
        /// Creates a source that may claim up to `max` bytes beyond the
        /// program break.
        ///
        /// # Safety
        /// For the lifetime of the returned source, nothing else in the
        /// process may move the program break. In particular there must be at
        /// most one live `SbrkSource`.
        pub const unsafe fn new(max: usize) -> SbrkSource {
            SbrkSource {
                base: None,
                len: 0,
                max,
            }
        }

        /// Locates the current break and fixes the aligned arena base.
        fn try_init(&mut self) -> Option<NonNull<u8>> {
            debug_assert!(self.base.is_none());
            // SAFETY: sbrk(0) only reads the current break.
            let top = unsafe { sbrk(0) };
            if top as isize == -1 {
                return None;
            }
            let aligned = round_up(top as usize, DOUBLE_WORD)?;
            let base = NonNull::new(aligned as *mut u8)?;
            self.base = Some(base);
            Some(base)
        }
    }

    impl HeapSource for SbrkSource {
        fn grow(&mut self, n: usize) -> Result<usize, SourceError> {
            if n == 0 {
                return Ok(self.len);
            }
            let new_len = self
                .len
                .checked_add(n)
                .filter(|&len| len <= self.max)
                .ok_or(SourceError(n))?;
            let base = match self.base {
                Some(base) => base,
                None => self.try_init().ok_or(SourceError(n))?,
            };
            let new_end = (base.as_ptr() as usize)
                .checked_add(new_len)
                .ok_or(SourceError(n))?;
            // SAFETY: the constructor's contract makes this source the only
            // manager of the program break.
            if unsafe { brk(new_end as *mut c_void) } == -1 {
                return Err(SourceError(n));
            }
            let old_top = self.len;
            self.len = new_len;
            Ok(old_top)
        }

        fn len(&self) -> usize {
            self.len
        }

        fn bytes(&self) -> &[u8] {
            match self.base {
                // SAFETY: brk confirmed ownership of base..base + len.
                Some(base) => unsafe { core::slice::from_raw_parts(base.as_ptr(), self.len) },
                None => &[],
            }
        }

        fn bytes_mut(&mut self) -> &mut [u8] {
            match self.base {
                // SAFETY: as in `bytes`, and the borrow is exclusive.
                Some(base) => unsafe {
                    core::slice::from_raw_parts_mut(base.as_ptr(), self.len)
                },
                None => &mut [],
            }
        }
    }
}
