// src/tokenizer/vocab.rs

use bstr::ByteSlice;
use rustc_hash::FxHashMap as HashMap;

use crate::tokenizer::pair::Pair;
use crate::tokenizer::{BYTE_TOKENS, Error, Rank, Result};

/// Byte string of every token id: the 256 byte tokens, one token per merge rule
/// and the registered special tokens.
///
/// This is derived state. It is rebuilt from the merge list and the special
/// tokens whenever either changes and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vocabulary {
    decoder: HashMap<Rank, Vec<u8>>,
    encoder: HashMap<Vec<u8>, Rank>,
}

impl Vocabulary {
    /// The 256 single-byte tokens and nothing else.
    pub fn byte_level() -> Self {
        let mut vocab = Self::default();
        for b in 0..=u8::MAX {
            vocab.insert(Rank::from(b), vec![b]);
        }
        vocab
    }

    pub fn get(&self, id: Rank) -> Option<&[u8]> {
        self.decoder.get(&id).map(Vec::as_slice)
    }

    /// Lowest id whose byte string equals `token`.
    pub fn id_of(&self, token: &[u8]) -> Option<Rank> {
        self.encoder.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.decoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoder.is_empty()
    }

    /// All entries in ascending id order.
    pub fn sorted(&self) -> Vec<(Rank, &[u8])> {
        let mut entries: Vec<_> = self
            .decoder
            .iter()
            .map(|(&id, bytes)| (id, bytes.as_slice()))
            .collect();
        entries.sort_unstable_by_key(|&(id, _)| id);
        entries
    }

    fn insert(&mut self, id: Rank, bytes: Vec<u8>) {
        self.encoder
            .entry(bytes.clone())
            .and_modify(|existing| *existing = (*existing).min(id))
            .or_insert(id);
        if let Some(previous) = self.decoder.insert(id, bytes) {
            // the id was overwritten by a special token; drop its old reverse entry
            if self.encoder.get(&previous) == Some(&id) {
                self.encoder.remove(&previous);
            }
        }
    }
}

/// Replays `merges` in creation order on top of the byte tokens, then adds the
/// special tokens, overwriting any entry with the same id.
///
/// Every merge operand must be a byte or an earlier merge; otherwise the
/// operand id is reported as [`Error::UnknownToken`].
pub fn build_vocab<'a, S>(merges: &[Pair], special_tokens: S) -> Result<Vocabulary>
where
    S: IntoIterator<Item = (Rank, &'a [u8])>,
{
    let mut vocab = Vocabulary::byte_level();
    for (rank, &(left, right)) in merges.iter().enumerate() {
        let id = Rank::try_from(BYTE_TOKENS as usize + rank)
            .map_err(|_| Error::InvalidConfig("too many merge rules".to_string()))?;
        // ids are inserted in order, so only bytes and earlier merges resolve
        let merged = {
            let l = vocab.get(left).ok_or(Error::UnknownToken(left))?;
            let r = vocab.get(right).ok_or(Error::UnknownToken(right))?;
            [l, r].concat()
        };
        vocab.insert(id, merged);
    }
    for (id, content) in special_tokens {
        vocab.insert(id, content.to_vec());
    }
    Ok(vocab)
}

/// Printable form of a token: invalid UTF-8 is replaced and control characters
/// are escaped as `\uXXXX`.
pub fn render_token(bytes: &[u8]) -> String {
    let text = bytes.to_str_lossy();
    let mut rendered = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_control() {
            rendered.push_str(&format!("\\u{:04x}", ch as u32));
        } else {
            rendered.push(ch);
        }
    }
    rendered
}
