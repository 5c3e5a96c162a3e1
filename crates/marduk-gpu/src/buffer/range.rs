//! Byte-range validation shared by every buffer transfer.

use super::BufferError;

/// A validated, non-empty `[offset, offset + len)` span inside a buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    /// Checks `offset + len <= size` and `len > 0`.
    ///
    /// Overflow of `offset + len` counts as out of range.
    pub fn checked(op: &'static str, offset: u64, len: u64, size: u64) -> Result<Self, BufferError> {
        let out_of_range = BufferError::OutOfRange {
            op,
            offset,
            len,
            size,
        };

        if len == 0 {
            return Err(out_of_range);
        }
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(Self { offset, len }),
            _ => Err(out_of_range),
        }
    }

    /// Length of the span from `offset` to the end of a `size`-byte buffer.
    ///
    /// Returns 0 when `offset` is at or past the end, which the subsequent
    /// [`ByteRange::checked`] call rejects.
    #[inline]
    pub fn remaining(offset: u64, size: u64) -> u64 {
        size.saturating_sub(offset)
    }
}

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline]
pub(crate) fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}
