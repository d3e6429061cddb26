//! Bit-packed 2D buffer for per-pixel flags.
//!
//! Classification masks and validity flags are stored one bit per pixel in
//! `u64` words, so whole-word boolean algebra is cheap.

const BITS_PER_WORD: usize = 64;

/// A 2D buffer storing boolean values packed as bits.
///
/// Bits past `len` in the last word are kept at zero so that word-wise
/// counting stays exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer2 {
    words: Vec<u64>,
    width: usize,
    height: usize,
    len: usize,
}

impl BitBuffer2 {
    pub fn new_filled(width: usize, height: usize, value: bool) -> Self {
        let len = width * height;
        let fill = if value { !0u64 } else { 0u64 };
        let mut buf = Self {
            words: vec![fill; len.div_ceil(BITS_PER_WORD)],
            width,
            height,
            len,
        };
        buf.clear_tail();
        buf
    }

    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize) -> bool,
    {
        let mut buf = Self::new_filled(width, height, false);
        for idx in 0..buf.len {
            if f(idx) {
                buf.set(idx, true);
            }
        }
        buf
    }

    pub fn from_slice(width: usize, height: usize, data: &[bool]) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length {} does not match dimensions {}x{}",
            data.len(),
            width,
            height
        );
        Self::from_fn(width, height, |idx| data[idx])
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        (self.words[idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: bool) {
        debug_assert!(idx < self.len);
        let bit = 1u64 << (idx % BITS_PER_WORD);
        let word = &mut self.words[idx / BITS_PER_WORD];
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        self.get(y * self.width + x)
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        self.set(y * self.width + x, value);
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    pub fn and(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a & b)
    }

    pub fn or(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a | b)
    }

    pub fn and_not(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a & !b)
    }

    pub fn not(&self) -> Self {
        let mut result = Self {
            words: self.words.iter().map(|w| !w).collect(),
            width: self.width,
            height: self.height,
            len: self.len,
        };
        result.clear_tail();
        result
    }

    /// True when every set bit of `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.assert_same_shape(other);
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & !b == 0)
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.assert_same_shape(other);
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == 0)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }

    fn zip_words<F>(&self, other: &Self, f: F) -> Self
    where
        F: Fn(u64, u64) -> u64,
    {
        self.assert_same_shape(other);
        let mut result = Self {
            words: self
                .words
                .iter()
                .zip(other.words.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            width: self.width,
            height: self.height,
            len: self.len,
        };
        result.clear_tail();
        result
    }

    fn assert_same_shape(&self, other: &Self) {
        assert_eq!(self.width, other.width, "width mismatch");
        assert_eq!(self.height, other.height, "height mismatch");
    }

    fn clear_tail(&mut self) {
        let used = self.len % BITS_PER_WORD;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << used) - 1;
            }
        }
    }
}
