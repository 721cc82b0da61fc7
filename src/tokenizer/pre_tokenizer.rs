// src/tokenizer/pre_tokenizer.rs

use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::tokenizer::Result;

/// GPT-2 style split: contractions, letter runs, number runs, punctuation runs
/// and whitespace, each optionally led by one space. This is the default.
pub const GPT2_SPLIT_PATTERN: &str =
    r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// GPT-4 style split: case-insensitive contractions, numbers in groups of at
/// most three digits, and newlines kept apart from other whitespace.
pub const GPT4_SPLIT_PATTERN: &str =
    r"'(?i:[sdmt]|ll|ve|re)|[^\r\n\p{L}\p{N}]?+\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]++[\r\n]*|\s*[\r\n]|\s+(?!\S)|\s+";

/// Splits raw text into chunks before byte-pair merging. Merges never cross a
/// chunk boundary.
///
/// Implementations must be lossless: concatenating the returned chunks gives
/// back `text` exactly.
pub trait PreTokenizer {
    fn split<'a>(&self, text: &'a str) -> Result<Vec<&'a [u8]>>;
}

/// Regex driven [`PreTokenizer`]. Every match becomes a chunk; text between
/// matches (which the built-in patterns never leave) becomes a chunk of its
/// own, so nothing is dropped.
#[derive(Debug, Clone)]
pub struct RegexSplitter {
    regex: Regex,
}

impl RegexSplitter {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

// Compiled once and cloned for every default splitter.
static DEFAULT_SPLITTER: LazyLock<RegexSplitter> = LazyLock::new(|| {
    RegexSplitter::new(GPT2_SPLIT_PATTERN)
        .unwrap_or_else(|e| panic!("Failed to compile default split pattern: {e}"))
});

impl Default for RegexSplitter {
    fn default() -> Self {
        DEFAULT_SPLITTER.clone()
    }
}

impl PreTokenizer for RegexSplitter {
    fn split<'a>(&self, text: &'a str) -> Result<Vec<&'a [u8]>> {
        let mut chunks = Vec::new();
        let mut last_end = 0;
        for mat in self.regex.find_iter(text) {
            let mat = mat?;
            let (start, end) = (mat.start(), mat.end());
            if last_end < start {
                chunks.push(text[last_end..start].as_bytes());
            }
            if start < end {
                chunks.push(text[start..end].as_bytes());
            }
            last_end = end;
        }
        if last_end < text.len() {
            chunks.push(text[last_end..].as_bytes());
        }
        Ok(chunks)
    }
}
