// src/tokenizer/word.rs

use crate::tokenizer::Rank;
use crate::tokenizer::pair::Pair;

/// Replaces every non-overlapping occurrence of `pair` in `ids` with `new_id`,
/// scanning left to right. After a replacement the scan resumes right after
/// the consumed pair, so `[5, 5, 5]` merged on `(5, 5)` yields `[new_id, 5]`.
pub fn merge(ids: &[Rank], pair: Pair, new_id: Rank) -> Vec<Rank> {
    let mut merged = Vec::with_capacity(ids.len());
    let mut i = 0;
    while i < ids.len() {
        if i + 1 < ids.len() && ids[i] == pair.0 && ids[i + 1] == pair.1 {
            merged.push(new_id);
            i += 2;
        } else {
            merged.push(ids[i]);
            i += 1;
        }
    }
    merged
}

/// One pre-tokenized chunk of the training corpus, stored as token ids, along
/// with the number of times the chunk occurred.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Word {
    ids: Vec<Rank>,
    pub count: u64,
}

impl Word {
    /// A word made of raw byte ids, occurring once.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_ids(bytes.iter().map(|&b| Rank::from(b)).collect())
    }

    pub fn from_ids(ids: Vec<Rank>) -> Self {
        Self { ids, count: 1 }
    }

    pub fn get_ids(&self) -> &[Rank] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Applies the merge to this word. Returns the number of replacements made.
    pub fn merge(&mut self, pair: Pair, new_id: Rank) -> usize {
        if self.ids.len() < 2 {
            return 0;
        }
        let merged = merge(&self.ids, pair, new_id);
        let replaced = self.ids.len() - merged.len();
        if replaced > 0 {
            self.ids = merged;
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_match_wins_without_overlap() {
        assert_eq!(merge(&[5, 5, 5], (5, 5), 300), vec![300, 5]);
        assert_eq!(merge(&[5, 5, 5, 5], (5, 5), 300), vec![300, 300]);
    }

    #[test]
    fn leaves_input_untouched() {
        let ids = vec![1, 2, 3, 1, 2];
        let merged = merge(&ids, (1, 2), 256);
        assert_eq!(merged, vec![256, 3, 256]);
        assert_eq!(ids, vec![1, 2, 3, 1, 2]);
    }

    #[test]
    fn pair_order_matters() {
        assert_eq!(merge(&[2, 1, 2], (1, 2), 256), vec![2, 256]);
        assert_eq!(merge(&[2, 1], (1, 2), 256), vec![2, 1]);
    }

    #[test]
    fn empty_and_single_sequences() {
        assert!(merge(&[], (1, 2), 256).is_empty());
        assert_eq!(merge(&[1], (1, 2), 256), vec![1]);
    }

    #[test]
    fn word_merge_reports_replacements() {
        let mut word = Word::from_bytes(b"abab");
        assert_eq!(word.get_ids(), &[97, 98, 97, 98]);
        assert_eq!(word.merge((97, 98), 256), 2);
        assert_eq!(word.get_ids(), &[256, 256]);
        assert_eq!(word.merge((97, 98), 257), 0);
        assert_eq!(word.len(), 2);
        assert_eq!(word.count, 1);
    }
}
