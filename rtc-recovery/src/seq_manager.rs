//! Input→output sequence-number translation for the egress path.

use crate::error::{Error, Result};
use crate::sequence::{SeqSet, SeqUnsigned, is_seq_higher_than_bounded};

/// Maps the sequence numbers a producer sends onto a hole-free output
/// sequence, across resyncs (codec key frames restarting the input space) and
/// packets the router decided to drop.
///
/// Width defaults to the full range of `T`; codecs that carry fewer bits in
/// their picture/TL0 indices use [`SeqManager::with_max_bits`].
#[derive(Debug)]
pub struct SeqManager<T = u16> {
    max_value: T,
    started: bool,
    base: T,
    max_output: T,
    max_input: T,
    dropped: SeqSet<T>,
}

impl<T: SeqUnsigned> Default for SeqManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SeqUnsigned> SeqManager<T> {
    /// Manager over the full range of `T`.
    pub fn new() -> Self {
        Self::with_max_value(T::MAX)
    }

    /// Manager over a `bits`-wide sequence space (`max_value = 2^bits - 1`).
    pub fn with_max_bits(bits: u32) -> Result<Self> {
        if bits == 0 || bits > T::BITS {
            return Err(Error::InvalidSeqBits(bits));
        }
        let max_value = if bits == T::BITS {
            T::MAX
        } else {
            T::from_count((1usize << bits) - 1)
        };
        Ok(Self::with_max_value(max_value))
    }

    fn with_max_value(max_value: T) -> Self {
        let zero = T::from_count(0);
        Self {
            max_value,
            started: false,
            base: zero,
            max_output: zero,
            max_input: zero,
            dropped: SeqSet::new(max_value),
        }
    }

    /// Resync the translation so that the input following `input` continues
    /// the output sequence without a hole.
    pub fn sync(&mut self, input: T) {
        self.base = self.max_output.wrapping_sub(input).mask(self.max_value);
        self.max_input = input;
        self.dropped.clear();
    }

    /// Record `input` as dropped by the router. Only inputs that advance the
    /// frontier are recorded; re-dropping behind `max_input` is a no-op.
    pub fn drop_input(&mut self, input: T) {
        if self.is_higher(input, self.max_input) {
            self.max_input = input;
            self.dropped.insert(input);
            self.clear_dropped();
        }
    }

    /// Translate `input` to its output sequence number.
    ///
    /// Returns `None` when `input` was previously dropped. Replaying an
    /// already-translated input yields the same output as long as no
    /// intervening drop of that key occurred.
    pub fn input(&mut self, input: T) -> Option<T> {
        let mut base = self.base;

        if !self.dropped.is_empty() {
            // Set max_input here if needed, before purging the dropped set.
            if self.started && self.is_higher(input, self.max_input) {
                self.max_input = input;
            }

            self.clear_dropped();

            base = self.base;

            if !self.dropped.is_empty() {
                if self.dropped.contains(input) {
                    return None;
                }

                // Discount dropped entries at or above this input; what
                // remains is the count of dropped entries below it, each of
                // which shifts the output down by one.
                let mut dropped_count = self.dropped.len();
                for &value in self.dropped.iter().rev() {
                    if self.is_higher(value, input) || value == input {
                        dropped_count -= 1;
                    } else {
                        break;
                    }
                }
                base = self
                    .base
                    .wrapping_sub(T::from_count(dropped_count))
                    .mask(self.max_value);
            }
        }

        let output = input.wrapping_add(base).mask(self.max_value);

        if !self.started {
            self.started = true;
            self.max_input = input;
            self.max_output = output;
        } else {
            if self.is_higher(input, self.max_input) {
                self.max_input = input;
            }
            if self.is_higher(output, self.max_output) {
                self.max_output = output;
            }
        }

        Some(output)
    }

    /// Highest input seen, in wrap-aware order.
    pub fn max_input(&self) -> T {
        self.max_input
    }

    /// Highest output emitted, in wrap-aware order.
    pub fn max_output(&self) -> T {
        self.max_output
    }

    /// Purge dropped entries above `max_input`; they belong to a previous
    /// cycle of the input space. Their contribution to `base` is released.
    fn clear_dropped(&mut self) {
        if self.dropped.is_empty() {
            return;
        }

        let max_value = self.max_value;
        let max_input = self.max_input;
        let purged = self
            .dropped
            .remove_prefix_while(|value| is_seq_higher_than_bounded(value, max_input, max_value));

        if purged > 0 {
            self.base = self
                .base
                .wrapping_sub(T::from_count(purged))
                .mask(self.max_value);
        }
    }

    fn is_higher(&self, lhs: T, rhs: T) -> bool {
        is_seq_higher_than_bounded(lhs, rhs, self.max_value)
    }
}
