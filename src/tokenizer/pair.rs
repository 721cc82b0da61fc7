// src/tokenizer/pair.rs

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap as HashMap;

use crate::tokenizer::Rank;
use crate::tokenizer::word::Word;

/// Two adjacent token ids, left then right.
pub type Pair = (Rank, Rank);

/// Frequency of every adjacent pair in one or more id sequences.
///
/// Besides the counts, the order in which each distinct pair was first seen is
/// kept, so that selecting the most frequent pair does not depend on hash map
/// iteration order.
#[derive(Debug, Default, Clone)]
pub struct PairStats {
    counts: HashMap<Pair, u64>,
    first_seen: Vec<Pair>,
}

impl PairStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts every window `(ids[i], ids[i + 1])`. Overlapping occurrences of
    /// the same pair (`[a, a, a]`) are all counted.
    pub fn from_ids(ids: &[Rank]) -> Self {
        let mut stats = Self::new();
        stats.add_sequence(ids, 1);
        stats
    }

    /// Counts the pairs of every word, weighted by how often the word occurred.
    pub fn from_words(words: &[Word]) -> Self {
        let mut stats = Self::new();
        for word in words {
            stats.add_sequence(word.get_ids(), word.count);
        }
        stats
    }

    pub fn add_sequence(&mut self, ids: &[Rank], weight: u64) {
        for window in ids.windows(2) {
            self.add((window[0], window[1]), weight);
        }
    }

    pub fn add(&mut self, pair: Pair, weight: u64) {
        match self.counts.entry(pair) {
            Entry::Occupied(mut occ) => *occ.get_mut() += weight,
            Entry::Vacant(vac) => {
                vac.insert(weight);
                self.first_seen.push(pair);
            }
        }
    }

    pub fn get(&self, pair: &Pair) -> u64 {
        self.counts.get(pair).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn counts(&self) -> &HashMap<Pair, u64> {
        &self.counts
    }

    /// The pair with the highest count. Among equal counts the pair that was
    /// encountered first wins. `None` when no pair was counted.
    pub fn most_frequent(&self) -> Option<(Pair, u64)> {
        let mut best: Option<(Pair, u64)> = None;
        for pair in &self.first_seen {
            let count = self.counts[pair];
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((*pair, count));
            }
        }
        best
    }
}
