// src/tokenizer/added_vocabulary.rs

use std::collections::HashSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::tokenizer::{Error, Rank, Result};

/// A token with a fixed textual meaning and an externally assigned id. Merge
/// rules never produce it; it is matched verbatim in the input instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AddedToken {
    /// The text of the token, matched literally.
    pub content: String,
    /// The id it encodes to.
    pub id: Rank,
}

impl AddedToken {
    pub fn new<S: Into<String>>(content: S, id: Rank) -> Self {
        Self {
            content: content.into(),
            id,
        }
    }
}

/// A piece of input after special tokens have been split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Ordinary text, to be pre-tokenized and merged.
    Text(&'a str),
    /// A special token occurrence.
    Special(Rank),
}

/// Registry of special tokens, in the order they were registered.
#[derive(Clone, Debug)]
pub struct AddedVocabulary {
    tokens: Vec<AddedToken>,
    by_content: HashMap<String, Rank>,
    by_id: HashMap<Rank, usize>,
    /// Leftmost-longest automaton over every registered content, pattern index
    /// aligned with `tokens`.
    split_trie: Option<AhoCorasick>,
}

impl AddedVocabulary {
    pub fn new() -> Self {
        Self {
            tokens: vec![],
            by_content: HashMap::default(),
            by_id: HashMap::default(),
            split_trie: None,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[AddedToken] {
        &self.tokens
    }

    pub fn token_to_id(&self, content: &str) -> Option<Rank> {
        self.by_content.get(content).copied()
    }

    pub fn id_to_token(&self, id: Rank) -> Option<&AddedToken> {
        self.by_id.get(&id).map(|&i| &self.tokens[i])
    }

    pub fn contains_id(&self, id: Rank) -> bool {
        self.by_id.contains_key(&id)
    }

    /// `(id, bytes)` of every token, as consumed by the vocabulary builder.
    pub fn entries(&self) -> impl Iterator<Item = (Rank, &[u8])> {
        self.tokens.iter().map(|t| (t.id, t.content.as_bytes()))
    }

    /// Registers `tokens`. Re-registering an identical token is a no-op; a
    /// content or id already bound to something else is rejected, as is an id
    /// below `reserved_below` (the byte and merge id space). On error nothing
    /// is registered.
    ///
    /// Returns the number of newly registered tokens.
    pub fn add_tokens(&mut self, tokens: &[AddedToken], reserved_below: Rank) -> Result<usize> {
        let mut staged: Vec<AddedToken> = Vec::new();
        for token in tokens {
            if token.id < reserved_below {
                return Err(Error::InvalidConfig(format!(
                    "special token {:?} has id {} inside the byte/merge id range [0, {})",
                    token.content, token.id, reserved_below
                )));
            }
            let bound_id = self
                .id_to_token(token.id)
                .or_else(|| staged.iter().find(|t| t.id == token.id))
                .map(|t| t.content.as_str());
            if let Some(content) = bound_id {
                if content == token.content {
                    continue;
                }
                return Err(Error::InvalidConfig(format!(
                    "id {} is already used by special token {:?}",
                    token.id, content
                )));
            }
            if !token.content.is_empty() {
                let bound_content = self
                    .by_content
                    .get(&token.content)
                    .copied()
                    .or_else(|| staged.iter().find(|t| t.content == token.content).map(|t| t.id));
                if let Some(id) = bound_content {
                    return Err(Error::InvalidConfig(format!(
                        "special token {:?} is already registered with id {}",
                        token.content, id
                    )));
                }
            }
            staged.push(token.clone());
        }

        let added = staged.len();
        for token in staged {
            let index = self.tokens.len();
            if !token.content.is_empty() {
                self.by_content.insert(token.content.clone(), token.id);
            }
            self.by_id.insert(token.id, index);
            self.tokens.push(token);
        }
        if added > 0 {
            self.refresh_split_trie()?;
        }
        Ok(added)
    }

    fn refresh_split_trie(&mut self) -> Result<()> {
        let patterns: Vec<&str> = self
            .tokens
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| t.content.as_str())
            .collect();
        self.split_trie = if patterns.is_empty() {
            None
        } else {
            Some(build_trie(&patterns)?)
        };
        Ok(())
    }

    /// Cuts `sentence` around occurrences of the special tokens in `allowed`.
    /// Special token text not in `allowed` stays part of the ordinary text.
    pub fn split<'a>(
        &self,
        sentence: &'a str,
        allowed: &HashSet<&str>,
    ) -> Result<Vec<Segment<'a>>> {
        if sentence.is_empty() {
            return Ok(vec![]);
        }
        let all_allowed = self
            .by_content
            .keys()
            .all(|content| allowed.contains(content.as_str()));

        let owned_trie;
        let (trie, patterns): (&AhoCorasick, Vec<&str>) = if all_allowed {
            match &self.split_trie {
                Some(trie) => (trie, self.contents()),
                None => return Ok(vec![Segment::Text(sentence)]),
            }
        } else {
            let patterns: Vec<&str> = self
                .contents()
                .into_iter()
                .filter(|content| allowed.contains(content))
                .collect();
            if patterns.is_empty() {
                return Ok(vec![Segment::Text(sentence)]);
            }
            owned_trie = build_trie(&patterns)?;
            (&owned_trie, patterns)
        };

        let mut segments = Vec::new();
        let mut last_end = 0;
        for mat in trie.find_iter(sentence) {
            if last_end < mat.start() {
                segments.push(Segment::Text(&sentence[last_end..mat.start()]));
            }
            let content = patterns[mat.pattern().as_usize()];
            segments.push(Segment::Special(self.by_content[content]));
            last_end = mat.end();
        }
        if last_end < sentence.len() {
            segments.push(Segment::Text(&sentence[last_end..]));
        }
        Ok(segments)
    }

    fn contents(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| t.content.as_str())
            .collect()
    }
}

fn build_trie(patterns: &[&str]) -> Result<AhoCorasick> {
    AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .build(patterns)
        .map_err(|e| Error::InvalidConfig(format!("cannot build special token matcher: {e}")))
}

impl Default for AddedVocabulary {
    fn default() -> Self {
        Self::new()
    }
}
