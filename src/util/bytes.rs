//! Byte-array comparison helpers.
//!
//! Terms and sorted doc values are ordered as unsigned byte strings, which is
//! exactly the order of `[u8]`'s `Ord` implementation. These helpers cover the
//! remaining needs: prefix sharing for the terms dictionary and validation of
//! strictly ascending dictionaries.

use std::cmp::Ordering;

/// Compare two byte strings as unsigned bytes.
#[inline]
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Index of the first differing byte, or `None` if the slices are equal.
///
/// If one slice is a prefix of the other the result is the shorter length.
pub fn mismatch(a: &[u8], b: &[u8]) -> Option<usize> {
    let len = a.len().min(b.len());
    for i in 0..len {
        if a[i] != b[i] {
            return Some(i);
        }
    }
    if a.len() == b.len() { None } else { Some(len) }
}

/// Length of the common prefix of `a` and `b`.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    mismatch(a, b).unwrap_or(a.len())
}

/// Position of the first element that is not strictly greater than its
/// predecessor, if any.
pub fn first_unsorted<T: AsRef<[u8]>>(values: &[T]) -> Option<usize> {
    values
        .windows(2)
        .position(|pair| compare(pair[0].as_ref(), pair[1].as_ref()) != Ordering::Less)
        .map(|i| i + 1)
}

/// Whether `values` is strictly ascending (sorted, no duplicates).
pub fn is_strictly_sorted<T: AsRef<[u8]>>(values: &[T]) -> bool {
    first_unsorted(values).is_none()
}
