//! Byte-size arithmetic used by the record encoders.
//!
//! The microcontroller stores every Step field with the smallest of three widths (1, 2 or 4
//! bytes). A field's width is announced by a 2 bit code in the record's leading size byte, see
//! [`ByteWidth::code`]. The memory estimate additionally needs an approximation of the padding
//! the toolchain inserts to keep PROGMEM objects word-aligned, provided by [`align`].

use crate::error::{Error, Result};

/// Storage width of an unsigned integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ByteWidth {
    One,
    Two,
    Four,
}

impl ByteWidth {
    /// Number of bytes occupied by a field of this width.
    pub fn bytes(self) -> usize {
        match self {
            ByteWidth::One => 1,
            ByteWidth::Two => 2,
            ByteWidth::Four => 4,
        }
    }

    /// The 2 bit code stored in a record's size byte: 1 → 0, 2 → 1, 4 → 2.
    pub fn code(self) -> u8 {
        match self {
            ByteWidth::One => 0,
            ByteWidth::Two => 1,
            ByteWidth::Four => 2,
        }
    }

    /// Inverse of [`ByteWidth::code`]. Code 3 is unused and yields `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ByteWidth::One),
            1 => Some(ByteWidth::Two),
            2 => Some(ByteWidth::Four),
            _ => None,
        }
    }
}

/// Returns the smallest width able to hold `value`.
///
/// # Arguments
///
/// * `value`: any integer convertible to `i128` (`u32` fields, `u64` totals, ...).
///
/// # Errors
///
/// [`Error::EncodingRange`] when `value` is negative or does not fit into 32 bits.
///
/// # Examples
///
/// ```
/// use optocompiler_backend::sizing::*;
///
/// assert_eq!(minimal_width(255).unwrap(), ByteWidth::One);
/// assert_eq!(minimal_width(256).unwrap(), ByteWidth::Two);
/// assert_eq!(minimal_width(65536).unwrap(), ByteWidth::Four);
/// assert!(minimal_width(-1).is_err());
/// assert!(minimal_width(1u64 << 32).is_err());
/// ```
pub fn minimal_width(value: impl Into<i128>) -> Result<ByteWidth> {
    let value = value.into();
    match value {
        v if v < 0 => Err(Error::EncodingRange(v)),
        v if v < 1 << 8 => Ok(ByteWidth::One),
        v if v < 1 << 16 => Ok(ByteWidth::Two),
        v if v < 1 << 32 => Ok(ByteWidth::Four),
        v => Err(Error::EncodingRange(v)),
    }
}

/// Little-endian bytes of `value`, truncated to `width`.
pub fn le_bytes(value: u32, width: ByteWidth) -> Vec<u8> {
    value.to_le_bytes()[..width.bytes()].to_vec()
}

/// Padding (in bytes) needed to bring an element of `size` bytes to a `word_size` boundary.
pub fn padding(size: usize, word_size: usize) -> usize {
    if word_size == 0 {
        return 0;
    }
    (word_size - size % word_size) % word_size
}

/// Approximates the aligned total of a collection of PROGMEM objects.
///
/// Elements are taken smallest first. An element already on a word boundary is counted as is.
/// Otherwise the largest remaining element that completes a word together with it is merged
/// into it (both leave the pool); if no partner exists the element is padded on its own.
///
/// This is a heuristic: the result is close to, but not guaranteed to equal, what the
/// toolchain actually produces.
///
/// # Examples
///
/// ```
/// use optocompiler_backend::sizing::align;
///
/// // 1 pairs with 3, 2 is already aligned
/// assert_eq!(align(&[1, 2, 3], 2), 6);
/// // 1 pairs with 5, the second 1 gets padded
/// assert_eq!(align(&[5, 1, 1], 2), 8);
/// ```
pub fn align(elements: &[usize], word_size: usize) -> usize {
    let mut pool = elements.to_vec();
    pool.sort_unstable_by(|a, b| b.cmp(a));

    let mut aligned = 0;
    while let Some(size) = pool.pop() {
        if padding(size, word_size) == 0 {
            aligned += size;
            continue;
        }
        let partner = pool
            .iter()
            .position(|&other| padding(size + other, word_size) == 0);
        match partner {
            Some(i) => aligned += size + pool.remove(i),
            None => aligned += size + padding(size, word_size),
        }
    }
    aligned
}
