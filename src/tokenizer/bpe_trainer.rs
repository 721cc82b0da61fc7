// src/tokenizer/bpe_trainer.rs

use log::{debug, info};
use rustc_hash::FxHashMap as HashMap;

use crate::tokenizer::bpe::BPE;
use crate::tokenizer::pair::{Pair, PairStats};
use crate::tokenizer::word::Word;
use crate::tokenizer::{
    AddedToken, BYTE_TOKENS, Error, ProgressBar, ProgressStyle, Rank, Result, Trainer,
};

struct Config {
    vocab_size: usize,
    min_frequency: u64,
    show_progress: bool,
    special_tokens: Vec<AddedToken>,
}

pub struct BpeTrainerBuilder {
    config: Config,
}

impl Default for BpeTrainerBuilder {
    fn default() -> Self {
        Self {
            config: Config {
                vocab_size: BYTE_TOKENS as usize,
                min_frequency: 1,
                show_progress: false,
                special_tokens: vec![],
            },
        }
    }
}

impl BpeTrainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target vocabulary size: 256 byte tokens plus one token per merge rule.
    #[must_use]
    pub fn vocab_size(mut self, size: usize) -> Self {
        self.config.vocab_size = size;
        self
    }

    /// Stop once the most frequent pair occurs fewer than `frequency` times.
    #[must_use]
    pub fn min_frequency(mut self, frequency: u64) -> Self {
        self.config.min_frequency = frequency;
        self
    }

    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    /// Special tokens registered on the model once training is done. Their ids
    /// must not be below the target vocabulary size.
    #[must_use]
    pub fn special_tokens(mut self, tokens: Vec<AddedToken>) -> Self {
        self.config.special_tokens = tokens;
        self
    }

    pub fn build(self) -> BpeTrainer {
        BpeTrainer {
            vocab_size: self.config.vocab_size,
            min_frequency: self.config.min_frequency,
            show_progress: self.config.show_progress,
            special_tokens: self.config.special_tokens,
            words: Vec::new(),
            word_index: HashMap::default(),
        }
    }
}

/// Learns merge rules by repeatedly merging the most frequent adjacent pair.
///
/// Ties between equally frequent pairs go to the pair encountered first when
/// scanning the corpus left to right, so the rules learned for a given corpus
/// never depend on hash map iteration order.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpeTrainer {
    pub vocab_size: usize,
    pub min_frequency: u64,
    pub show_progress: bool,
    pub special_tokens: Vec<AddedToken>,

    /// Distinct chunks fed so far, in order of first appearance.
    words: Vec<Word>,
    word_index: HashMap<Vec<u8>, usize>,
}

impl Default for BpeTrainer {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BpeTrainer {
    pub fn new(vocab_size: usize) -> Self {
        Self::builder().vocab_size(vocab_size).build()
    }

    pub fn builder() -> BpeTrainerBuilder {
        BpeTrainerBuilder::new()
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// Adds one pre-tokenized chunk to the corpus. Repeated chunks only bump
    /// the count of the word first created for them.
    pub fn add_chunk(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        match self.word_index.get(chunk) {
            Some(&i) => self.words[i].count += 1,
            None => {
                self.word_index.insert(chunk.to_vec(), self.words.len());
                self.words.push(Word::from_bytes(chunk));
            }
        }
    }

    fn setup_progress(&self) -> Option<ProgressBar> {
        if self.show_progress {
            let p = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {msg:<30!} {wide_bar} {pos:>9!}/{len:<9!}")
            {
                p.set_style(style);
            }
            Some(p)
        } else {
            None
        }
    }

    fn finalize_progress(&self, p: &Option<ProgressBar>, final_len: usize) {
        if let Some(p) = p {
            p.set_length(final_len as u64);
            p.finish();
        }
    }

    fn update_progress(&self, p: &Option<ProgressBar>, len: usize, message: &'static str) {
        if let Some(p) = p {
            p.set_message(message);
            p.set_length(len as u64);
            p.reset();
        }
    }

    fn check_vocab_size(&self) -> Result<()> {
        if self.vocab_size < BYTE_TOKENS as usize {
            return Err(Error::InvalidConfig(format!(
                "vocab size must be at least {}, got {}",
                BYTE_TOKENS, self.vocab_size
            )));
        }
        Ok(())
    }

    /// Learns up to `vocab_size - 256` merge rules from a single id sequence.
    ///
    /// Stops early, without error, when fewer than two tokens remain.
    pub fn train_sequence(&self, ids: &[Rank]) -> Result<Vec<Pair>> {
        self.check_vocab_size()?;
        self.do_train(vec![Word::from_ids(ids.to_vec())], 0)
    }

    /// Core merge loop. `existing_merges` rules are already recorded, so the
    /// first new token gets id `256 + existing_merges`.
    pub fn do_train(&self, mut words: Vec<Word>, existing_merges: usize) -> Result<Vec<Pair>> {
        self.check_vocab_size()?;
        let first_id = BYTE_TOKENS as usize + existing_merges;
        let num_merges = self.vocab_size.saturating_sub(first_id);

        let progress = self.setup_progress();
        self.update_progress(&progress, num_merges, "Compute merges");

        let mut merges: Vec<Pair> = Vec::with_capacity(num_merges);
        while merges.len() < num_merges {
            let stats = PairStats::from_words(&words);
            let Some((pair, count)) = stats.most_frequent() else {
                debug!("no adjacent pair left after {} merges", merges.len());
                break;
            };
            if count < self.min_frequency {
                debug!(
                    "best pair {:?} occurs {} times, below min frequency {}",
                    pair, count, self.min_frequency
                );
                break;
            }

            let new_id = Rank::try_from(first_id + merges.len()).map_err(|_| {
                Error::InvalidConfig(format!("vocab size {} overflows token ids", self.vocab_size))
            })?;
            let replaced: usize = words
                .iter_mut()
                .map(|word| word.merge(pair, new_id) * word.count as usize)
                .sum();
            debug!(
                "merge {}: {:?} -> {} ({} occurrences, {} distinct pairs)",
                merges.len() + 1,
                pair,
                new_id,
                replaced,
                stats.len()
            );
            merges.push(pair);

            if let Some(p) = &progress {
                p.inc(1);
            }
        }
        self.finalize_progress(&progress, merges.len());

        info!(
            "learned {} merges ({} requested); vocab size {}",
            merges.len(),
            num_merges,
            first_id + merges.len()
        );
        Ok(merges)
    }
}

impl Trainer for BpeTrainer {
    type Model = BPE;

    /// Appends the learned rules to `model` and registers the configured
    /// special tokens. `model` is only modified if everything succeeds.
    fn train(&self, model: &mut Self::Model) -> Result<Vec<AddedToken>> {
        self.check_vocab_size()?;
        if let Some(token) = self
            .special_tokens
            .iter()
            .find(|t| (t.id as usize) < self.vocab_size)
        {
            return Err(Error::InvalidConfig(format!(
                "special token {:?} has id {}, below the target vocab size {}",
                token.content, token.id, self.vocab_size
            )));
        }

        let existing = model.merges().len();
        let words: Vec<Word> = if existing == 0 {
            self.words.clone()
        } else {
            self.words
                .iter()
                .map(|word| {
                    let mut encoded = Word::from_ids(model.apply_merges(word.get_ids().to_vec()));
                    encoded.count = word.count;
                    encoded
                })
                .collect()
        };

        let merges = self.do_train(words, existing)?;
        let mut updated = model.clone();
        updated.append_merges(&merges)?;
        updated.register_special_tokens(&self.special_tokens)?;
        *model = updated;
        Ok(self.special_tokens.clone())
    }

    fn should_show_progress(&self) -> bool {
        self.show_progress
    }

    /// Runs every sequence through `process` (normally a pre-tokenizer) and
    /// adds the resulting chunks to the corpus. Feeding again extends it.
    fn feed<I, S, F>(&mut self, iterator: I, process: F) -> Result<()>
    where
        I: Iterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> Result<Vec<Vec<u8>>>,
    {
        for sequence in iterator {
            for chunk in process(sequence.as_ref())? {
                self.add_chunk(&chunk);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{Model, PreTokenizer, RegexSplitter};
    use proptest::prelude::*;

    fn bytes(text: &str) -> Vec<Rank> {
        text.bytes().map(Rank::from).collect()
    }

    #[test]
    fn learns_the_classic_example() {
        let trainer = BpeTrainer::new(258);
        let merges = trainer.train_sequence(&bytes("aaabdaaabac")).unwrap();
        // "aa" occurs 4 times (overlapping), then (aa, a) and (a, b) tie at 2
        // and (aa, a) is encountered first.
        assert_eq!(merges, vec![(97, 97), (256, 97)]);
    }

    #[test]
    fn training_is_deterministic() {
        let trainer = BpeTrainer::new(262);
        let ids = bytes("the cat sat on the mat with the hat");
        let first = trainer.train_sequence(&ids).unwrap();
        for _ in 0..5 {
            assert_eq!(trainer.train_sequence(&ids).unwrap(), first);
        }
    }

    #[test]
    fn short_sequences_stop_immediately() {
        let trainer = BpeTrainer::new(300);
        assert!(trainer.train_sequence(&[]).unwrap().is_empty());
        assert!(trainer.train_sequence(&[65]).unwrap().is_empty());
    }

    #[test]
    fn stops_once_everything_is_merged() {
        let trainer = BpeTrainer::new(1000);
        let merges = trainer.train_sequence(&bytes("abcd")).unwrap();
        assert_eq!(merges, vec![(97, 98), (256, 99), (257, 100)]);
    }

    #[test]
    fn vocab_size_below_byte_range_is_rejected() {
        let trainer = BpeTrainer::new(255);
        assert!(matches!(
            trainer.train_sequence(&bytes("abab")),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn vocab_size_of_256_learns_nothing() {
        let trainer = BpeTrainer::new(256);
        assert!(trainer.train_sequence(&bytes("abab")).unwrap().is_empty());
    }

    #[test]
    fn min_frequency_stops_early() {
        let trainer = BpeTrainer::builder().vocab_size(300).min_frequency(2).build();
        let merges = trainer.train_sequence(&bytes("ababxy")).unwrap();
        assert_eq!(merges, vec![(97, 98)]);
    }

    #[test]
    fn feed_deduplicates_chunks_in_first_seen_order() {
        let splitter = RegexSplitter::default();
        let mut trainer = BpeTrainer::new(260);
        trainer
            .feed(["low lower", "low lowest"].iter(), |text| {
                Ok(splitter.split(text)?.into_iter().map(<[u8]>::to_vec).collect())
            })
            .unwrap();
        let words: Vec<(Vec<Rank>, u64)> = trainer
            .words()
            .iter()
            .map(|w| (w.get_ids().to_vec(), w.count))
            .collect();
        assert_eq!(
            words,
            vec![
                (bytes("low"), 2),
                (bytes(" lower"), 1),
                (bytes(" lowest"), 1),
            ]
        );
    }

    #[test]
    fn merges_do_not_cross_chunks() {
        let mut trainer = BpeTrainer::new(300);
        trainer.add_chunk(b"ab");
        trainer.add_chunk(b"ab");
        let merges = trainer.do_train(trainer.words().to_vec(), 0).unwrap();
        // the (b, a) pair between the two chunks is never counted
        assert_eq!(merges, vec![(97, 98)]);
    }

    #[test]
    fn weighted_words_match_the_expanded_corpus() {
        let mut trainer = BpeTrainer::new(264);
        for chunk in ["hug", "pug", "pun", "hug", "bun", "hugs", "hug", "pun"] {
            trainer.add_chunk(chunk.as_bytes());
        }
        let deduped = trainer.do_train(trainer.words().to_vec(), 0).unwrap();

        let expanded: Vec<Word> = ["hug", "pug", "pun", "hug", "bun", "hugs", "hug", "pun"]
            .iter()
            .map(|c| Word::from_bytes(c.as_bytes()))
            .collect();
        let full = trainer.do_train(expanded, 0).unwrap();
        assert_eq!(deduped, full);
    }

    #[test]
    fn train_registers_special_tokens() {
        let mut trainer = BpeTrainer::builder()
            .vocab_size(260)
            .special_tokens(vec![AddedToken::new("<|endoftext|>", 260)])
            .build();
        trainer.add_chunk(b"aaaa");
        let mut model = BPE::default();
        let added = trainer.train(&mut model).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(model.merges(), &[(97, 97), (256, 256)]);
        assert_eq!(model.token_to_id(b"<|endoftext|>"), Some(260));
        assert_eq!(model.get_vocab_size(), 259);
    }

    #[test]
    fn special_ids_inside_the_target_range_are_rejected() {
        let mut trainer = BpeTrainer::builder()
            .vocab_size(300)
            .special_tokens(vec![AddedToken::new("<s>", 299)])
            .build();
        trainer.add_chunk(b"abab");
        let mut model = BPE::default();
        assert!(matches!(
            trainer.train(&mut model),
            Err(Error::InvalidConfig(_))
        ));
        assert!(model.merges().is_empty());
    }

    #[test]
    fn continued_training_appends_rules() {
        let mut model = BPE::default();
        let mut first = BpeTrainer::new(257);
        first.add_chunk(b"abcabc");
        first.train(&mut model).unwrap();
        assert_eq!(model.merges(), &[(97, 98)]);

        let mut second = BpeTrainer::new(258);
        second.add_chunk(b"abcabc");
        second.train(&mut model).unwrap();
        assert_eq!(model.merges(), &[(97, 98), (256, 99)]);
    }

    proptest! {
        #[test]
        fn rule_ids_only_reference_earlier_tokens(
            ids in proptest::collection::vec(0u32..8, 0..64),
            extra in 0usize..40,
        ) {
            let merges = BpeTrainer::new(256 + extra).train_sequence(&ids).unwrap();
            prop_assert!(merges.len() <= extra);
            for (k, &(left, right)) in merges.iter().enumerate() {
                let own_id = 256 + k as Rank;
                prop_assert!(left < own_id);
                prop_assert!(right < own_id);
            }
        }
    }
}
