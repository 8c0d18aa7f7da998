//! Index arithmetic for the word ring.
//!
//! Every cursor in a stream is a monotonically increasing 64-bit word index.
//! Indices never wrap in practice (at one word per nanosecond a `u64` lasts
//! centuries), so ordering comparisons between cursors are plain `<`/`>`.
//! Only when touching memory is an index folded into the ring:
//!
//! ```text
//! data_size = 8
//!
//! index:     0 1 2 3 4 5 6 7 | 8 9 10 11 12 13 14 15 | 16 ...
//! position:  0 1 2 3 4 5 6 7 | 0 1  2  3  4  5  6  7 |  0 ...
//! ```
//!
//! Unlike a mask-based ring the data size is whatever fits in the buffer, so
//! folding uses `%` rather than a power-of-two mask.

/// A word index into the stream.
pub type Index = u64;

/// Rounds `size` up to the next multiple of `align`.
///
/// `align` need not be a power of two: word sizes such as a 6-byte stereo
/// 24-bit PCM frame are legal. Zero stays zero.
///
/// ```
/// use strata_sds::ring::align_size_to;
/// assert_eq!(align_size_to(0, 8), 0);
/// assert_eq!(align_size_to(13, 8), 16);
/// assert_eq!(align_size_to(13, 6), 18);
/// ```
#[inline]
pub const fn align_size_to(size: usize, align: usize) -> usize {
    if size == 0 {
        0
    } else {
        ((size - 1) / align + 1) * align
    }
}

/// Folds a stream index into a word position in `[0, data_size)`.
#[inline(always)]
pub fn ring_position(index: Index, data_size: Index) -> Index {
    index % data_size
}

/// Number of words that can be touched, starting at `after`, before the ring
/// wraps back to position 0.
///
/// Always at least 1, so a copy can be split into a head of
/// `min(n, words_until_wrap(i))` words and a tail starting at position 0.
///
/// ```text
/// data_size = 8
/// after = 5  -> 3   (positions 5, 6, 7)
/// after = 8  -> 8   (a full lap from position 0)
/// ```
#[inline(always)]
pub fn words_until_wrap(after: Index, data_size: Index) -> Index {
    data_size - ring_position(after, data_size)
}

/// Number of words between `from` and `to`, or 0 if `to` is behind `from`.
///
/// Cursors may legitimately sit ahead of the writer (a reader that sought into
/// the future), so every distance is taken saturating.
#[inline(always)]
pub fn distance(from: Index, to: Index) -> Index {
    to.saturating_sub(from)
}

/// Splits a run of `count` words starting at `index` into the part before the
/// wrap and the part after it.
#[inline]
pub fn split_at_wrap(index: Index, count: Index, data_size: Index) -> (Index, Index) {
    let head = count.min(words_until_wrap(index, data_size));
    (head, count - head)
}
