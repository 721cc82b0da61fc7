// src/tokenizer/mod.rs

pub mod added_vocabulary;
pub mod bpe;
pub mod bpe_trainer;
pub mod model_file;
pub mod pair;
pub mod pre_tokenizer;
pub mod result;
pub mod vocab;
pub mod word;

#[cfg(not(feature = "progressbar"))]
mod progress;

pub use added_vocabulary::{AddedToken, AddedVocabulary, Segment};
pub use bpe::{BPE, Rank};
pub use bpe_trainer::{BpeTrainer, BpeTrainerBuilder};
pub use model_file::{MODEL_VERSION, ModelFile};
pub use pair::{Pair, PairStats};
pub use pre_tokenizer::{GPT2_SPLIT_PATTERN, GPT4_SPLIT_PATTERN, PreTokenizer, RegexSplitter};
pub use result::{Error, Result};
pub use vocab::{Vocabulary, build_vocab, render_token};
pub use word::{Word, merge};

#[cfg(feature = "progressbar")]
pub(crate) use indicatif::{ProgressBar, ProgressStyle};
#[cfg(not(feature = "progressbar"))]
pub(crate) use progress::{ProgressBar, ProgressStyle};

/// Number of single-byte tokens. Merge rule `k` produces token `BYTE_TOKENS + k`.
pub const BYTE_TOKENS: Rank = 256;

/// Core behaviour of a tokenizer model.
pub trait Model: Send + Sync {
    /// Encodes text, treating any special token text as ordinary text.
    fn tokenize(&self, text: &str) -> Result<Vec<Rank>>;

    /// Expands token ids back into the bytes they stand for.
    fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>>;

    fn id_to_token(&self, id: Rank) -> Option<&[u8]>;

    fn token_to_id(&self, token: &[u8]) -> Option<Rank>;

    fn get_vocab_size(&self) -> usize;

    fn get_vocab(&self) -> &Vocabulary;
}

/// A trainer learns from a corpus fed to it and updates a [`Model`].
pub trait Trainer: Send + Sync {
    /// The type of Model this trainer can produce.
    type Model: Model;

    /// Trains `model`, returning the special tokens registered on it.
    fn train(&self, model: &mut Self::Model) -> Result<Vec<AddedToken>>;

    /// Feeds training sequences. `process` cuts each sequence into the chunks
    /// merges may not cross, normally with a [`PreTokenizer`].
    fn feed<I, S, F>(&mut self, iterator: I, process: F) -> Result<()>
    where
        I: Iterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> Result<Vec<Vec<u8>>>;

    fn should_show_progress(&self) -> bool;
}
