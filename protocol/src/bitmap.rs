use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bit per populated tick index.
///
/// Backs the liquidation sweep and new-tick placement: "highest populated tick
/// at or below X" resolves by scanning words, not the full price range. Words
/// holding no set bits are removed, so every stored word is nonzero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickBitmap {
    words: BTreeMap<i32, u64>,
}

impl TickBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    fn split(tick: i32) -> (i32, u32) {
        (tick.div_euclid(64), tick.rem_euclid(64) as u32)
    }

    pub fn set(&mut self, tick: i32) {
        let (word, bit) = Self::split(tick);
        *self.words.entry(word).or_insert(0) |= 1u64 << bit;
    }

    pub fn clear(&mut self, tick: i32) {
        let (word, bit) = Self::split(tick);
        if let Some(w) = self.words.get_mut(&word) {
            *w &= !(1u64 << bit);
            if *w == 0 {
                self.words.remove(&word);
            }
        }
    }

    pub fn is_set(&self, tick: i32) -> bool {
        let (word, bit) = Self::split(tick);
        self.words
            .get(&word)
            .map(|w| w & (1u64 << bit) != 0)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of populated ticks.
    pub fn population(&self) -> usize {
        self.words.values().map(|w| w.count_ones() as usize).sum()
    }

    /// Highest populated tick at or below `tick`.
    pub fn highest_set_at_or_below(&self, tick: i32) -> Option<i32> {
        let (word, bit) = Self::split(tick);
        if let Some(&w) = self.words.get(&word) {
            let mask = if bit == 63 {
                u64::MAX
            } else {
                (1u64 << (bit + 1)) - 1
            };
            let masked = w & mask;
            if masked != 0 {
                return Some(word * 64 + (63 - masked.leading_zeros() as i32));
            }
        }
        self.words
            .range(..word)
            .next_back()
            .map(|(&wi, &w)| wi * 64 + (63 - w.leading_zeros() as i32))
    }

    /// Highest populated tick overall.
    pub fn highest_set(&self) -> Option<i32> {
        self.words
            .iter()
            .next_back()
            .map(|(&wi, &w)| wi * 64 + (63 - w.leading_zeros() as i32))
    }
}
