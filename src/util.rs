//! Utility functions.

/// Returns the smallest multiple of `step` that is greater than or equal to
/// `value`, or `None` if that multiple does not fit in a `usize`.
///
/// # Panics
/// Panics if `step` is 0.
#[inline]
pub(crate) fn round_up(value: usize, step: usize) -> Option<usize> {
    match value % step {
        0 => Some(value),
        rem => value.checked_add(step - rem),
    }
}
