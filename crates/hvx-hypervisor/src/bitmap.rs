use smallvec::{SmallVec, smallvec};

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-size bitmap with range search.
///
/// Up to 256 bits are stored inline.
#[derive(Debug, Clone)]
pub(crate) struct Bitmap {
    words: SmallVec<[u64; 4]>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            words: smallvec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len, "bit {index} out of range");

        if index < self.len {
            self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        }
    }

    pub fn clear(&mut self, index: usize) {
        self.clear_range(index, index + 1);
    }

    /// Clears the bits in `[lo, hi)`.
    pub fn clear_range(&mut self, lo: usize, hi: usize) {
        let hi = hi.min(self.len);
        if lo >= hi {
            return;
        }

        for word in lo / WORD_BITS..hi.div_ceil(WORD_BITS) {
            self.words[word] &= !word_mask(word, lo, hi);
        }
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }

    /// Returns the lowest set bit in `[lo, hi)`.
    pub fn first_set(&self, lo: usize, hi: usize) -> Option<usize> {
        self.find(lo, hi, |word| word)
    }

    /// Returns the lowest clear bit in `[lo, hi)`.
    pub fn first_unset(&self, lo: usize, hi: usize) -> Option<usize> {
        self.find(lo, hi, |word| !word)
    }

    fn find(&self, lo: usize, hi: usize, select: impl Fn(u64) -> u64) -> Option<usize> {
        let hi = hi.min(self.len);
        if lo >= hi {
            return None;
        }

        (lo / WORD_BITS..hi.div_ceil(WORD_BITS)).find_map(|word| {
            let bits = select(self.words[word]) & word_mask(word, lo, hi);
            (bits != 0).then(|| word * WORD_BITS + bits.trailing_zeros() as usize)
        })
    }
}

/// Returns the bits of `word` that fall into `[lo, hi)`.
fn word_mask(word: usize, lo: usize, hi: usize) -> u64 {
    let first = word * WORD_BITS;
    let start = lo.saturating_sub(first).min(WORD_BITS);
    let end = hi.saturating_sub(first).min(WORD_BITS);

    if start >= end {
        return 0;
    }

    let upper = if end == WORD_BITS { u64::MAX } else { (1 << end) - 1 };
    upper & !((1 << start) - 1)
}
