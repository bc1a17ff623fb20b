//! Bit sets: fixed, growable, and lock-free atomic.
//!
//! Three variants share one API shape:
//!
//! - [`FixedBitSet`]: dense, sized at construction, supports set algebra
//! - [`GrowableBitSet`]: grows on `set`, for visited tracking during search
//! - [`AtomicBitSet`]: lock-free concurrent bits, used for the deletion set
//!
//! Iteration uses `next_set_bit` / `prev_set_bit` with the [`NO_MORE`]
//! sentinel rather than a signed "not found" value.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel returned by `next_set_bit` / `prev_set_bit` when no bit matches.
pub const NO_MORE: u32 = u32::MAX;

const WORD_BITS: usize = 64;

#[inline]
fn word_count(nbits: usize) -> usize {
    nbits.div_ceil(WORD_BITS)
}

/// Dense bit set over a fixed number of bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBitSet {
    words: Vec<u64>,
    nbits: usize,
}

impl FixedBitSet {
    /// Creates a bit set of `nbits` bits, all clear.
    #[must_use]
    pub fn new(nbits: usize) -> Self {
        Self {
            words: vec![0; word_count(nbits)],
            nbits,
        }
    }

    /// Number of addressable bits.
    #[must_use]
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Sets bit `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[inline]
    pub fn set(&mut self, i: u32) {
        let i = i as usize;
        assert!(i < self.nbits, "bit index {i} out of range {}", self.nbits);
        self.words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
    }

    /// Clears bit `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[inline]
    pub fn clear(&mut self, i: u32) {
        let i = i as usize;
        assert!(i < self.nbits, "bit index {i} out of range {}", self.nbits);
        self.words[i / WORD_BITS] &= !(1u64 << (i % WORD_BITS));
    }

    /// Returns bit `i`; out-of-range indexes read as clear.
    #[inline]
    #[must_use]
    pub fn get(&self, i: u32) -> bool {
        let i = i as usize;
        if i >= self.nbits {
            return false;
        }
        self.words[i / WORD_BITS] & (1u64 << (i % WORD_BITS)) != 0
    }

    /// Clears every bit, keeping the allocation.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Number of set bits.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the smallest set bit `j >= from`, or [`NO_MORE`].
    #[must_use]
    pub fn next_set_bit(&self, from: u32) -> u32 {
        next_set_bit_in(&self.words, self.nbits, from)
    }

    /// Returns the largest set bit `j <= from`, or [`NO_MORE`].
    #[must_use]
    pub fn prev_set_bit(&self, from: u32) -> u32 {
        if self.nbits == 0 {
            return NO_MORE;
        }
        let i = (from as usize).min(self.nbits - 1);
        let mut word_idx = i / WORD_BITS;
        // Mask off bits above `i` in the first word
        let mut word = self.words[word_idx] & (u64::MAX >> (WORD_BITS - 1 - i % WORD_BITS));
        loop {
            if word != 0 {
                let bit = WORD_BITS - 1 - word.leading_zeros() as usize;
                return u32::try_from(word_idx * WORD_BITS + bit).unwrap_or(NO_MORE);
            }
            if word_idx == 0 {
                return NO_MORE;
            }
            word_idx -= 1;
            word = self.words[word_idx];
        }
    }

    /// In-place union with another set of the same size.
    ///
    /// # Panics
    ///
    /// Panics if sizes differ.
    pub fn union_with(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bit set sizes must match");
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// In-place intersection with another set of the same size.
    ///
    /// # Panics
    ///
    /// Panics if sizes differ.
    pub fn intersect_with(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bit set sizes must match");
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= b;
        }
    }

    /// In-place symmetric difference with another set of the same size.
    ///
    /// # Panics
    ///
    /// Panics if sizes differ.
    pub fn xor_with(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bit set sizes must match");
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a ^= b;
        }
    }
}

/// Bit set that grows on demand; unset high bits read as clear.
///
/// Friendly to sparse id spaces: the backing array only extends to the
/// highest bit ever set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrowableBitSet {
    words: Vec<u64>,
}

impl GrowableBitSet {
    /// Creates an empty bit set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty bit set pre-sized for `nbits` bits.
    #[must_use]
    pub fn with_capacity(nbits: usize) -> Self {
        Self {
            words: vec![0; word_count(nbits)],
        }
    }

    /// Sets bit `i`, growing the backing array if needed.
    ///
    /// Returns true if the bit was previously clear.
    #[inline]
    pub fn set(&mut self, i: u32) -> bool {
        let i = i as usize;
        let word = i / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << (i % WORD_BITS);
        let was_clear = self.words[word] & mask == 0;
        self.words[word] |= mask;
        was_clear
    }

    /// Clears bit `i`; never grows.
    #[inline]
    pub fn clear(&mut self, i: u32) {
        let i = i as usize;
        let word = i / WORD_BITS;
        if word < self.words.len() {
            self.words[word] &= !(1u64 << (i % WORD_BITS));
        }
    }

    /// Returns bit `i`.
    #[inline]
    #[must_use]
    pub fn get(&self, i: u32) -> bool {
        let i = i as usize;
        let word = i / WORD_BITS;
        word < self.words.len() && self.words[word] & (1u64 << (i % WORD_BITS)) != 0
    }

    /// Clears every bit, keeping the allocation.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Number of set bits.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the smallest set bit `j >= from`, or [`NO_MORE`].
    #[must_use]
    pub fn next_set_bit(&self, from: u32) -> u32 {
        next_set_bit_in(&self.words, self.words.len() * WORD_BITS, from)
    }
}

fn next_set_bit_in(words: &[u64], nbits: usize, from: u32) -> u32 {
    let from = from as usize;
    if from >= nbits {
        return NO_MORE;
    }
    let mut word_idx = from / WORD_BITS;
    let mut word = words[word_idx] & (u64::MAX << (from % WORD_BITS));
    loop {
        if word != 0 {
            let bit = word.trailing_zeros() as usize;
            let idx = word_idx * WORD_BITS + bit;
            if idx >= nbits {
                return NO_MORE;
            }
            return u32::try_from(idx).unwrap_or(NO_MORE);
        }
        word_idx += 1;
        if word_idx >= words.len() {
            return NO_MORE;
        }
        word = words[word_idx];
    }
}

/// Lock-free concurrent bit set.
///
/// Readers take an acquire snapshot of the word array; writers publish bits
/// with release stores. Growth swaps in a larger array under a mutex; an
/// epoch seqlock makes writers replay any update that raced with the copy,
/// so `set`/`get` never block and no update is lost.
#[derive(Debug)]
pub struct AtomicBitSet {
    words: ArcSwap<Vec<AtomicU64>>,
    grow_lock: Mutex<()>,
    // Odd while a grow-copy is in flight; writers retry until even and stable
    epoch: AtomicU64,
}

impl AtomicBitSet {
    /// Creates a concurrent bit set pre-sized for `nbits` bits.
    #[must_use]
    pub fn with_capacity(nbits: usize) -> Self {
        let words = (0..word_count(nbits)).map(|_| AtomicU64::new(0)).collect();
        Self {
            words: ArcSwap::from_pointee(words),
            grow_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Sets bit `i`, growing the backing array if needed.
    ///
    /// Returns true if the bit was previously clear. Idempotent.
    pub fn set(&self, i: u32) -> bool {
        self.update(i, |slot, mask| slot.fetch_or(mask, Ordering::AcqRel) & mask == 0)
    }

    /// Clears bit `i`; never grows.
    pub fn clear(&self, i: u32) {
        let word = i as usize / WORD_BITS;
        if self.words.load().len() <= word {
            return;
        }
        self.update(i, |slot, mask| {
            slot.fetch_and(!mask, Ordering::AcqRel) & mask != 0
        });
    }

    fn update(&self, i: u32, op: impl Fn(&AtomicU64, u64) -> bool) -> bool {
        let word = i as usize / WORD_BITS;
        let mask = 1u64 << (i as usize % WORD_BITS);
        loop {
            let before = self.epoch.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let snapshot = self.words.load();
            let Some(slot) = snapshot.get(word) else {
                drop(snapshot);
                self.grow(word + 1);
                continue;
            };
            let changed = op(slot, mask);
            // A grow may have copied the array mid-update; replay if so
            if self.epoch.load(Ordering::Acquire) == before {
                return changed;
            }
        }
    }

    /// Returns bit `i` with acquire semantics.
    #[must_use]
    pub fn get(&self, i: u32) -> bool {
        let word = i as usize / WORD_BITS;
        let snapshot = self.words.load();
        snapshot
            .get(word)
            .is_some_and(|slot| slot.load(Ordering::Acquire) & (1u64 << (i as usize % WORD_BITS)) != 0)
    }

    /// Number of set bits at the time of the call.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words
            .load()
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Collects all set bit indexes, ascending.
    #[must_use]
    pub fn set_bits(&self) -> Vec<u32> {
        let snapshot = self.words.load();
        let mut out = Vec::new();
        for (word_idx, slot) in snapshot.iter().enumerate() {
            let mut word = slot.load(Ordering::Acquire);
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                if let Ok(idx) = u32::try_from(word_idx * WORD_BITS + bit) {
                    out.push(idx);
                }
                word &= word - 1;
            }
        }
        out
    }

    /// Copies the current contents into a plain [`FixedBitSet`] snapshot.
    #[must_use]
    pub fn snapshot(&self, nbits: usize) -> FixedBitSet {
        let mut fixed = FixedBitSet::new(nbits);
        let source = self.words.load();
        let limit = fixed.words.len().min(source.len());
        for i in 0..limit {
            fixed.words[i] = source[i].load(Ordering::Acquire);
        }
        fixed
    }

    fn grow(&self, min_words: usize) {
        let _guard = self.grow_lock.lock();
        let current = self.words.load_full();
        if current.len() >= min_words {
            return;
        }
        // Odd epoch tells writers a copy is in flight
        self.epoch.fetch_add(1, Ordering::AcqRel);
        // Double to amortize; copy live bits into the new array
        let new_len = min_words.max(current.len() * 2).max(4);
        let grown: Vec<AtomicU64> = (0..new_len)
            .map(|i| {
                AtomicU64::new(
                    current
                        .get(i)
                        .map_or(0, |w| w.load(Ordering::Acquire)),
                )
            })
            .collect();
        self.words.store(Arc::new(grown));
        self.epoch.fetch_add(1, Ordering::Release);
    }
}
