// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A fixed layout of small bit sections packed into one atomic word, with
//! per-section atomic operations.
//!
//! The scheduler keeps a work unit's whole lifecycle — state machine,
//! `required` flag, `acquired` flag — in a single word so that a worker
//! racing to pick up a work observes all of it consistently and can commit
//! a transition with one compare-exchange. [`AtomicBitfield`] is that word:
//! a [`Layout`] declares the section widths once, and every operation
//! addresses one section while preserving the others.
//!
//! ```
//! use filament_abits::{AtomicBitfield, Layout};
//!
//! // | 3    3 | 2    1 | 0     0 |
//! // |  flag  |  mode  |  state  |   (widths 1, 2, 1)
//! static LAYOUT: Layout<3> = Layout::new([1, 2, 1]);
//!
//! let bits: AtomicBitfield<u8, 3> = AtomicBitfield::new(&LAYOUT);
//! bits.store(1, 0b10);
//! assert_eq!(bits.load(1), 0b10);
//! assert_eq!(bits.load(0), 0);
//! ```

mod word;

use core::fmt;
use core::sync::atomic::Ordering;
pub use word::Word;

/// The widths and offsets of the sections sharing one word.
///
/// Sections are contiguous from the least significant bit, in declaration
/// order. Constructing a layout whose total width exceeds the backing word
/// is rejected when the [`AtomicBitfield`] is created.
#[derive(Debug, Clone, Copy)]
pub struct Layout<const N: usize> {
    widths: [u32; N],
    offsets: [u32; N],
}

/// A word of [`Word`] type `W` carrying `N` atomically addressable sections.
pub struct AtomicBitfield<W: Word, const N: usize> {
    bits: W::Atomic,
    layout: &'static Layout<N>,
}

// === impl Layout ===

impl<const N: usize> Layout<N> {
    #[must_use]
    pub const fn new(widths: [u32; N]) -> Self {
        let mut offsets = [0_u32; N];
        let mut total = 0_u32;
        let mut i = 0;
        while i < N {
            assert!(widths[i] > 0, "zero-width section");
            offsets[i] = total;
            total += widths[i];
            i += 1;
        }
        Self { widths, offsets }
    }

    pub const fn total_width(&self) -> u32 {
        if N == 0 {
            0
        } else {
            self.offsets[N - 1] + self.widths[N - 1]
        }
    }

    pub const fn width(&self, section: usize) -> u32 {
        self.widths[section]
    }

    pub const fn offset(&self, section: usize) -> u32 {
        self.offsets[section]
    }
}

// === impl AtomicBitfield ===

impl<W: Word, const N: usize> AtomicBitfield<W, N> {
    /// Creates a zeroed bitfield over `layout`.
    ///
    /// # Panics
    ///
    /// Panics if the layout does not fit into `W`.
    #[must_use]
    pub fn new(layout: &'static Layout<N>) -> Self {
        assert!(
            layout.total_width() <= W::BITS,
            "layout of {} bits does not fit the backing word",
            layout.total_width(),
        );
        Self {
            bits: W::atomic_zero(),
            layout,
        }
    }

    fn mask(&self, section: usize) -> W {
        W::section_mask(self.layout.width(section)).shl(self.layout.offset(section))
    }

    /// Replaces `section` inside the full word `word` with `value`.
    fn insert(&self, section: usize, value: W, word: W) -> W {
        let mask = self.mask(section);
        word.and(mask.not())
            .or(value.shl(self.layout.offset(section)).and(mask))
    }

    fn extract(&self, section: usize, word: W) -> W {
        word.shr(self.layout.offset(section))
            .and(W::section_mask(self.layout.width(section)))
    }

    /// Atomically loads one section.
    pub fn load(&self, section: usize) -> W {
        self.load_ordered(section, Ordering::Relaxed)
    }

    pub fn load_ordered(&self, section: usize, ordering: Ordering) -> W {
        self.extract(section, W::atomic_load(&self.bits, ordering))
    }

    /// Atomically stores `value` into one section, preserving the others.
    pub fn store(&self, section: usize, value: W) {
        self.exchange(section, value);
    }

    /// Atomically replaces one section, returning its previous value.
    pub fn exchange(&self, section: usize, value: W) -> W {
        self.exchange_ordered(section, value, Ordering::AcqRel)
    }

    pub fn exchange_ordered(&self, section: usize, value: W, ordering: Ordering) -> W {
        let mut current = W::atomic_load(&self.bits, Ordering::Relaxed);
        loop {
            let desired = self.insert(section, value, current);
            match W::atomic_compare_exchange_weak(
                &self.bits,
                current,
                desired,
                ordering,
                Ordering::Relaxed,
            ) {
                Ok(_) => return self.extract(section, current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically flips a 1-bit section, returning its previous value.
    ///
    /// # Panics
    ///
    /// Panics if the section is wider than one bit.
    pub fn flip(&self, section: usize) -> bool {
        assert_eq!(self.layout.width(section), 1, "flip needs a 1-bit section");
        let prior = W::atomic_fetch_xor(&self.bits, self.mask(section), Ordering::AcqRel);
        !self.extract(section, prior).is_zero()
    }

    /// Commits `desired` into `exchange_section` iff `compare_section`
    /// currently reads `expected`. Other sections are left untouched.
    ///
    /// Returns `false` only on a genuine mismatch: a weak-CAS failure caused
    /// by a concurrent change to an unrelated section re-reads and retries.
    pub fn compare_exchange(
        &self,
        compare_section: usize,
        exchange_section: usize,
        expected: W,
        desired: W,
    ) -> bool {
        loop {
            let current = W::atomic_load(&self.bits, Ordering::Relaxed);
            let expected_word = self.insert(compare_section, expected, current);
            let desired_word = self.insert(exchange_section, desired, expected_word);
            match W::atomic_compare_exchange_weak(
                &self.bits,
                expected_word,
                desired_word,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                // the failure is only conclusive if the word did not move
                // under us in some unrelated section
                Err(actual) if actual == current => return false,
                Err(_) => {}
            }
        }
    }

    /// Two-compare variant: both expected sections must match for the commit;
    /// only `exchange_section` is written.
    pub fn compare_exchange2(
        &self,
        compare_section_1: usize,
        compare_section_2: usize,
        exchange_section: usize,
        expected_1: W,
        expected_2: W,
        desired: W,
    ) -> bool {
        loop {
            let current = W::atomic_load(&self.bits, Ordering::Relaxed);
            let mut expected_word = self.insert(compare_section_1, expected_1, current);
            expected_word = self.insert(compare_section_2, expected_2, expected_word);
            let desired_word = self.insert(exchange_section, desired, expected_word);
            match W::atomic_compare_exchange_weak(
                &self.bits,
                expected_word,
                desired_word,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) if actual == current => return false,
                Err(_) => {}
            }
        }
    }
}

impl<W: Word, const N: usize> fmt::Debug for AtomicBitfield<W, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sections = f.debug_list();
        for section in 0..N {
            sections.entry(&self.load(section));
        }
        sections.finish()
    }
}
