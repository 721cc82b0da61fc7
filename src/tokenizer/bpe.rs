// src/tokenizer/bpe.rs

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use log::info;
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;

use crate::tokenizer::added_vocabulary::{AddedToken, AddedVocabulary, Segment};
use crate::tokenizer::bpe_trainer::BpeTrainer;
use crate::tokenizer::model_file::{self, ModelFile};
use crate::tokenizer::pair::Pair;
use crate::tokenizer::pre_tokenizer::{GPT2_SPLIT_PATTERN, PreTokenizer, RegexSplitter};
use crate::tokenizer::vocab::{Vocabulary, build_vocab};
use crate::tokenizer::word::merge;
use crate::tokenizer::{BYTE_TOKENS, Error, Model, Result, Trainer};

pub type Rank = u32;

/// A byte-level BPE tokenizer: a pre-tokenizer pattern, an ordered list of
/// merge rules and a set of special tokens.
///
/// The `k`-th merge rule produces token `256 + k`. Both operands of a rule are
/// always byte tokens or earlier rules. The vocabulary is derived from the
/// rules and special tokens and rebuilt whenever either changes.
#[derive(Debug, Clone)]
pub struct BPE {
    splitter: RegexSplitter,
    merges: Vec<Pair>,
    /// Merge priority of every rule, keyed by its pair.
    ranks: HashMap<Pair, Rank>,
    added_vocabulary: AddedVocabulary,
    vocab: Vocabulary,
}

impl Model for BPE {
    fn tokenize(&self, text: &str) -> Result<Vec<Rank>> {
        self.encode_ordinary(text)
    }

    fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>> {
        self.decode_bytes(tokens)
    }

    fn id_to_token(&self, id: Rank) -> Option<&[u8]> {
        self.vocab.get(id)
    }

    fn token_to_id(&self, token: &[u8]) -> Option<Rank> {
        self.vocab.id_of(token)
    }

    fn get_vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn get_vocab(&self) -> &Vocabulary {
        &self.vocab
    }
}

impl BPE {
    /// An untrained tokenizer splitting text with `pattern`.
    pub fn new(pattern: &str) -> Result<Self> {
        Self::from_parts(pattern, Vec::new(), &[])
    }

    /// Builds a tokenizer from previously learned rules.
    pub fn from_parts(
        pattern: &str,
        merges: Vec<Pair>,
        special_tokens: &[AddedToken],
    ) -> Result<Self> {
        let mut bpe = Self {
            splitter: RegexSplitter::new(pattern)?,
            merges: Vec::new(),
            ranks: HashMap::default(),
            added_vocabulary: AddedVocabulary::new(),
            vocab: Vocabulary::byte_level(),
        };
        bpe.append_merges(&merges)?;
        bpe.register_special_tokens(special_tokens)?;
        Ok(bpe)
    }

    pub fn pattern(&self) -> &str {
        self.splitter.pattern()
    }

    /// Merge rules in creation order.
    pub fn merges(&self) -> &[Pair] {
        &self.merges
    }

    /// Rank of the rule merging `pair`, if any.
    pub fn rank(&self, pair: &Pair) -> Option<Rank> {
        self.ranks.get(pair).copied()
    }

    pub fn added_tokens(&self) -> &[AddedToken] {
        self.added_vocabulary.tokens()
    }

    /// Contents of every registered special token.
    pub fn special_tokens(&self) -> HashSet<&str> {
        self.added_vocabulary
            .tokens()
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| t.content.as_str())
            .collect()
    }

    /// Appends rules after the existing ones. Rule `k` of `merges` gets id
    /// `256 + self.merges().len() + k`. Nothing is appended unless every rule
    /// is valid.
    pub fn append_merges(&mut self, merges: &[Pair]) -> Result<()> {
        if merges.is_empty() {
            return Ok(());
        }
        let mut ranks = self.ranks.clone();
        for (offset, &pair) in merges.iter().enumerate() {
            let rank = Rank::try_from(self.merges.len() + offset)
                .map_err(|_| Error::InvalidConfig("too many merge rules".to_string()))?;
            let own_id = BYTE_TOKENS + rank;
            if pair.0 >= own_id || pair.1 >= own_id {
                return Err(Error::InvalidConfig(format!(
                    "merge rule {:?} for token {} references a token that does not exist yet",
                    pair, own_id
                )));
            }
            if self.added_vocabulary.contains_id(own_id) {
                return Err(Error::InvalidConfig(format!(
                    "merge rule {:?} would get id {}, which is a special token",
                    pair, own_id
                )));
            }
            if ranks.insert(pair, rank).is_some() {
                return Err(Error::InvalidConfig(format!("duplicate merge rule {:?}", pair)));
            }
        }
        let mut extended = self.merges.clone();
        extended.extend_from_slice(merges);
        self.vocab = build_vocab(&extended, self.added_vocabulary.entries())?;
        self.merges = extended;
        self.ranks = ranks;
        Ok(())
    }

    /// Registers special tokens. Their ids must lie outside the byte and merge
    /// id range. Returns the number of tokens newly added.
    pub fn register_special_tokens(&mut self, tokens: &[AddedToken]) -> Result<usize> {
        let reserved_below = Rank::try_from(BYTE_TOKENS as usize + self.merges.len())
            .map_err(|_| Error::InvalidConfig("too many merge rules".to_string()))?;
        let mut added_vocabulary = self.added_vocabulary.clone();
        let added = added_vocabulary.add_tokens(tokens, reserved_below)?;
        if added > 0 {
            self.vocab = build_vocab(&self.merges, added_vocabulary.entries())?;
            self.added_vocabulary = added_vocabulary;
        }
        Ok(added)
    }

    /// Trains on `text` until the vocabulary holds `vocab_size` tokens (or no
    /// pair is left), appending to any rules already present.
    pub fn train(&mut self, text: &str, vocab_size: usize) -> Result<()> {
        let mut trainer = BpeTrainer::new(vocab_size);
        trainer.feed(std::iter::once(text), |sequence| {
            Ok(self
                .splitter
                .split(sequence)?
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect())
        })?;
        trainer.train(self)?;
        Ok(())
    }

    /// Applies merge rules to `ids` until none matches, always merging the
    /// adjacent pair whose rule was created first.
    pub fn apply_merges(&self, mut ids: Vec<Rank>) -> Vec<Rank> {
        while ids.len() >= 2 {
            let best = ids
                .windows(2)
                .filter_map(|w| {
                    let pair = (w[0], w[1]);
                    self.ranks.get(&pair).map(|&rank| (rank, pair))
                })
                .min_by_key(|&(rank, _)| rank);
            let Some((rank, pair)) = best else {
                break;
            };
            ids = merge(&ids, pair, BYTE_TOKENS + rank);
        }
        ids
    }

    /// Encodes a single pre-tokenized chunk.
    pub fn encode_chunk(&self, chunk: &[u8]) -> Vec<Rank> {
        self.apply_merges(chunk.iter().map(|&b| Rank::from(b)).collect())
    }

    /// Encodes text without recognising special tokens: their text is encoded
    /// like any other.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<Rank>> {
        let mut ret = Vec::with_capacity(text.len());
        for chunk in self.splitter.split(text)? {
            ret.extend(self.encode_chunk(chunk));
        }
        Ok(ret)
    }

    /// Encodes text, emitting the id of every special token listed in
    /// `allowed_special` where its text occurs. Other special token text is
    /// encoded as ordinary text.
    pub fn encode(&self, text: &str, allowed_special: &HashSet<&str>) -> Result<Vec<Rank>> {
        let mut ret = Vec::with_capacity(text.len());
        for segment in self.added_vocabulary.split(text, allowed_special)? {
            match segment {
                Segment::Text(piece) => ret.extend(self.encode_ordinary(piece)?),
                Segment::Special(id) => ret.push(id),
            }
        }
        Ok(ret)
    }

    /// Encodes text with every registered special token allowed.
    pub fn encode_with_special_tokens(&self, text: &str) -> Result<Vec<Rank>> {
        let allowed_special = self.special_tokens();
        self.encode(text, &allowed_special)
    }

    /// Encodes independent texts in parallel.
    pub fn encode_batch<S>(&self, texts: &[S]) -> Result<Vec<Vec<Rank>>>
    where
        S: AsRef<str> + Sync,
    {
        texts
            .par_iter()
            .map(|text| self.encode_ordinary(text.as_ref()))
            .collect()
    }

    /// Expands every token down to bytes. Each occurrence is expanded in full,
    /// no matter how often the same token appears.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>> {
        let mut ret = Vec::with_capacity(tokens.len() * 2);
        // explicit stack so that long merge chains cannot overflow the call stack
        let mut pending: Vec<Rank> = Vec::new();
        for &token in tokens {
            pending.push(token);
            while let Some(id) = pending.pop() {
                if id < BYTE_TOKENS {
                    ret.push(id as u8);
                } else if let Some(special) = self.added_vocabulary.id_to_token(id) {
                    ret.extend_from_slice(special.content.as_bytes());
                } else if let Some(&(left, right)) = self.merges.get((id - BYTE_TOKENS) as usize) {
                    pending.push(right);
                    pending.push(left);
                } else {
                    return Err(Error::UnknownToken(id));
                }
            }
        }
        Ok(ret)
    }

    /// Decodes to a string, replacing invalid UTF-8 sequences.
    pub fn decode(&self, tokens: &[Rank]) -> Result<String> {
        Ok(self.decode_bytes(tokens)?.to_str_lossy().into_owned())
    }

    /// Writes `<prefix>.model` (the rules, loadable with [`BPE::from_file`])
    /// and `<prefix>.vocab.json` (human-readable, not loadable). Existing
    /// files are left alone if the model cannot be represented.
    pub fn save<P: AsRef<Path>>(&self, file_prefix: P) -> Result<()> {
        model_file::validate(self)?;
        let model_path = with_suffix(file_prefix.as_ref(), ".model");
        let mut writer = BufWriter::new(File::create(&model_path)?);
        model_file::write_model(self, &mut writer)?;
        writer.flush()?;

        let vocab_path = with_suffix(file_prefix.as_ref(), ".vocab.json");
        let mut writer = BufWriter::new(File::create(&vocab_path)?);
        model_file::write_vocab_json(self, &mut writer)?;
        writer.flush()?;

        info!(
            "saved {} merges and {} special tokens to {}",
            self.merges.len(),
            self.added_vocabulary.len(),
            model_path.display()
        );
        Ok(())
    }

    /// Reads a `.model` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let ModelFile {
            pattern,
            special_tokens,
            merges,
        } = model_file::read_model(reader)?;
        let bpe = Self::from_parts(&pattern, merges, &special_tokens).map_err(|e| match e {
            Error::Pattern(e) => Error::format(2, format!("invalid pattern: {e}")),
            Error::InvalidConfig(message) => Error::format(0, message),
            other => other,
        })?;
        info!(
            "loaded {} merges and {} special tokens from {}",
            bpe.merges.len(),
            bpe.added_vocabulary.len(),
            path.display()
        );
        Ok(bpe)
    }

    /// Replaces this tokenizer with the one stored at `path`. On error `self`
    /// is left untouched.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        *self = Self::from_file(path)?;
        Ok(())
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl Default for BPE {
    fn default() -> Self {
        Self {
            splitter: RegexSplitter::default(),
            merges: Vec::new(),
            ranks: HashMap::default(),
            added_vocabulary: AddedVocabulary::new(),
            vocab: Vocabulary::byte_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::pre_tokenizer::GPT4_SPLIT_PATTERN;
    use proptest::prelude::*;

    const SAMPLE: &str = "hello world!!123안녕하세 😉";

    fn trained(text: &str, vocab_size: usize) -> BPE {
        let mut bpe = BPE::default();
        bpe.train(text, vocab_size).unwrap();
        bpe
    }

    #[test]
    fn default_uses_the_gpt2_pattern() {
        let bpe = BPE::default();
        assert_eq!(bpe.pattern(), GPT2_SPLIT_PATTERN);
        assert_eq!(bpe.get_vocab_size(), 256);
    }

    #[test]
    fn decode_expands_repeated_tokens_every_time() {
        let bpe = BPE::from_parts(GPT2_SPLIT_PATTERN, vec![(97, 98)], &[]).unwrap();
        assert_eq!(bpe.decode_bytes(&[256, 256]).unwrap(), b"abab");
        assert_eq!(bpe.decode(&[256, 32, 256, 256]).unwrap(), "ab abab");
    }

    #[test]
    fn decode_expands_nested_rules() {
        let merges = vec![(97, 98), (256, 256), (257, 99)];
        let bpe = BPE::from_parts(GPT2_SPLIT_PATTERN, merges, &[]).unwrap();
        assert_eq!(bpe.decode(&[258, 257, 256]).unwrap(), "ababcababab");
    }

    #[test]
    fn decode_rejects_unknown_tokens() {
        let bpe = BPE::from_parts(GPT2_SPLIT_PATTERN, vec![(97, 98)], &[]).unwrap();
        assert!(matches!(bpe.decode_bytes(&[9999]), Err(Error::UnknownToken(9999))));
        assert!(matches!(bpe.decode_bytes(&[97, 257]), Err(Error::UnknownToken(257))));
    }

    #[test]
    fn encode_prefers_the_earliest_rule() {
        // rule 0 merges (b, c), rule 1 merges (a, b); "abc" must become a + bc
        let merges = vec![(98, 99), (97, 98)];
        let bpe = BPE::from_parts(GPT2_SPLIT_PATTERN, merges, &[]).unwrap();
        assert_eq!(bpe.encode_ordinary("abc").unwrap(), vec![97, 256]);
        assert_eq!(bpe.encode_ordinary("ab").unwrap(), vec![257]);
    }

    #[test]
    fn encode_looks_rules_up_by_pair() {
        // token ids that happen to be small numbers must not be read as rule
        // indices: (1, 2) has no rule even though rules 1 and 2 exist
        let merges = vec![(120, 121), (1, 3), (256, 122)];
        let bpe = BPE::from_parts(GPT2_SPLIT_PATTERN, merges, &[]).unwrap();
        assert_eq!(bpe.apply_merges(vec![1, 2, 1, 3]), vec![1, 2, 257]);
        assert_eq!(bpe.encode_ordinary("xyz").unwrap(), vec![258]);
    }

    #[test]
    fn encode_keeps_merges_inside_chunks() {
        // the rule merges "o" and " ", which only ever meet across a chunk boundary
        let bpe = BPE::from_parts(GPT2_SPLIT_PATTERN, vec![(111, 32)], &[]).unwrap();
        assert_eq!(bpe.encode_ordinary("go now").unwrap(), vec![103, 111, 32, 110, 111, 119]);
    }

    #[test]
    fn round_trips_the_training_text() {
        let bpe = trained(SAMPLE, 300);
        let ids = bpe.encode_ordinary(SAMPLE).unwrap();
        assert!(ids.len() < SAMPLE.len());
        assert_eq!(bpe.decode(&ids).unwrap(), SAMPLE);
    }

    #[test]
    fn round_trips_unseen_text() {
        let bpe = trained("the quick brown fox jumps over the lazy dog", 280);
        let text = "the lazy fox, the quick dog\nand 42 cats";
        let ids = bpe.encode_ordinary(text).unwrap();
        assert_eq!(bpe.decode_bytes(&ids).unwrap(), text.as_bytes());
    }

    #[test]
    fn training_on_text_learns_rules_in_order() {
        let bpe = trained("aaabdaaabac", 258);
        assert_eq!(bpe.merges(), &[(97, 97), (256, 97)]);
        assert_eq!(bpe.rank(&(256, 97)), Some(1));
        assert_eq!(bpe.id_to_token(257), Some(&b"aaa"[..]));
    }

    #[test]
    fn special_tokens_encode_and_decode() {
        let mut bpe = trained("hello hello hello", 260);
        bpe.register_special_tokens(&[AddedToken::new("<|endoftext|>", 1000)]).unwrap();
        let text = "hello<|endoftext|>hello";

        let ids = bpe.encode_with_special_tokens(text).unwrap();
        assert!(ids.contains(&1000));
        assert_eq!(bpe.decode(&ids).unwrap(), text);

        let ordinary = bpe.encode_ordinary(text).unwrap();
        assert!(!ordinary.contains(&1000));
        assert_eq!(bpe.decode(&ordinary).unwrap(), text);

        let none = HashSet::new();
        assert_eq!(bpe.encode(text, &none).unwrap(), ordinary);
    }

    #[test]
    fn special_ids_cannot_shadow_merges() {
        let mut bpe = trained("abababab", 258);
        let err = bpe
            .register_special_tokens(&[AddedToken::new("<s>", 257)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(bpe.added_tokens().is_empty());
    }

    #[test]
    fn merges_cannot_take_special_ids() {
        let mut bpe = BPE::default();
        bpe.register_special_tokens(&[AddedToken::new("<s>", 257)]).unwrap();
        let err = bpe.append_merges(&[(97, 98), (98, 99)]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(bpe.merges().is_empty());
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert!(BPE::from_parts(GPT2_SPLIT_PATTERN, vec![(97, 256)], &[]).is_err());
        assert!(BPE::from_parts(GPT2_SPLIT_PATTERN, vec![(97, 98), (97, 98)], &[]).is_err());
        assert!(BPE::new("(").is_err());
    }

    #[test]
    fn batch_encoding_matches_sequential() {
        let bpe = trained(SAMPLE, 290);
        let texts = ["hello", "world!!", "123 안녕", ""];
        let batch = bpe.encode_batch(&texts).unwrap();
        for (text, ids) in texts.iter().zip(batch) {
            assert_eq!(ids, bpe.encode_ordinary(text).unwrap());
        }
    }

    #[test]
    fn vocabulary_is_rebuilt_after_training() {
        let mut bpe = BPE::new(GPT4_SPLIT_PATTERN).unwrap();
        assert_eq!(bpe.get_vocab_size(), 256);
        bpe.train("abcabcabc", 258).unwrap();
        assert_eq!(bpe.get_vocab_size(), 258);
        assert_eq!(bpe.token_to_id(b"ab"), Some(256));
        assert_eq!(bpe.get_vocab().get(257), Some(&b"abc"[..]));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(text in "\\PC{0,48}", corpus in "[a-c ]{0,64}") {
            let bpe = trained(&corpus, 300);
            let ids = bpe.encode_ordinary(&text).unwrap();
            prop_assert_eq!(bpe.decode_bytes(&ids).unwrap(), text.as_bytes().to_vec());
        }

        #[test]
        fn vocabulary_matches_decode(corpus in "[a-d]{0,80}") {
            let bpe = trained(&corpus, 290);
            for (k, _) in bpe.merges().iter().enumerate() {
                let id = BYTE_TOKENS + k as Rank;
                let decoded = bpe.decode_bytes(&[id]).unwrap();
                prop_assert_eq!(bpe.id_to_token(id).unwrap(), &decoded[..]);
            }
        }
    }
}
