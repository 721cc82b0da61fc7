// src/tokenizer/model_file.rs
//
// Line oriented model format:
//
//   minbpe v1
//   <pre-tokenizer pattern>
//   <number of special tokens>
//   <id> <content>      one per special token
//   <left> <right>      one per merge rule, in creation order

use std::collections::HashSet;
use std::io::{BufRead, Write};

use serde::Serialize;

use crate::tokenizer::added_vocabulary::AddedToken;
use crate::tokenizer::bpe::BPE;
use crate::tokenizer::pair::Pair;
use crate::tokenizer::vocab::render_token;
use crate::tokenizer::{BYTE_TOKENS, Error, Model, Rank, Result};

pub const MODEL_VERSION: &str = "minbpe v1";

/// Contents of a model file, before any tokenizer is built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFile {
    pub pattern: String,
    pub special_tokens: Vec<AddedToken>,
    pub merges: Vec<Pair>,
}

/// Checks that `bpe` can be written in the line format: neither the pattern
/// nor any special token content may contain a line break.
pub fn validate(bpe: &BPE) -> Result<()> {
    if bpe.pattern().contains(['\n', '\r']) {
        return Err(Error::InvalidConfig(
            "pattern containing a line break cannot be saved".to_string(),
        ));
    }
    if let Some(token) = bpe
        .added_tokens()
        .iter()
        .find(|t| t.content.contains(['\n', '\r']))
    {
        return Err(Error::InvalidConfig(format!(
            "special token {:?} contains a line break and cannot be saved",
            token.content
        )));
    }
    Ok(())
}

pub fn write_model<W: Write>(bpe: &BPE, writer: &mut W) -> Result<()> {
    validate(bpe)?;
    writeln!(writer, "{MODEL_VERSION}")?;
    writeln!(writer, "{}", bpe.pattern())?;
    writeln!(writer, "{}", bpe.added_tokens().len())?;
    for token in bpe.added_tokens() {
        if token.content.is_empty() {
            writeln!(writer, "{}", token.id)?;
        } else {
            writeln!(writer, "{} {}", token.id, token.content)?;
        }
    }
    for (left, right) in bpe.merges() {
        writeln!(writer, "{left} {right}")?;
    }
    Ok(())
}

/// Parses a model file. Every structural problem is a [`Error::Format`]
/// naming the offending line; rules referencing tokens that do not exist yet
/// and special ids inside the merge range are rejected here too.
pub fn read_model<R: BufRead>(reader: R) -> Result<ModelFile> {
    let mut lines = reader.lines().enumerate().map(|(i, line)| (i + 1, line));
    let mut next_line = |what: &str| -> Result<(usize, String)> {
        match lines.next() {
            Some((n, line)) => {
                let mut line = line?;
                if line.ends_with('\r') {
                    line.pop();
                }
                Ok((n, line))
            }
            None => Err(Error::format(0, format!("unexpected end of file, expected {what}"))),
        }
    };

    let (n, version) = next_line("the version tag")?;
    if version.trim_end() != MODEL_VERSION {
        return Err(Error::format(n, format!("unsupported version {version:?}")));
    }

    let (_, pattern) = next_line("the pattern")?;

    let (n, count) = next_line("the special token count")?;
    let count: usize = count
        .trim()
        .parse()
        .map_err(|e| Error::format(n, format!("invalid special token count {count:?}: {e}")))?;

    let mut special_tokens = Vec::with_capacity(count.min(1024));
    let mut special_lines = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let (n, line) = next_line("a special token")?;
        let (id, content) = match line.split_once(' ') {
            Some((id, content)) => (id, content),
            None => (line.as_str(), ""),
        };
        let id: Rank = id
            .trim()
            .parse()
            .map_err(|e| Error::format(n, format!("invalid special token id {id:?}: {e}")))?;
        special_tokens.push(AddedToken::new(content, id));
        special_lines.push(n);
    }

    let mut merges: Vec<Pair> = Vec::new();
    let mut seen: HashSet<Pair> = HashSet::new();
    for (n, line) in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pair = parse_merge(line).ok_or_else(|| {
            Error::format(n, format!("expected two token ids, got {line:?}"))
        })?;
        let own_id = BYTE_TOKENS as usize + merges.len();
        if pair.0 as usize >= own_id || pair.1 as usize >= own_id {
            return Err(Error::format(
                n,
                format!("merge {pair:?} for token {own_id} references a later token"),
            ));
        }
        if !seen.insert(pair) {
            return Err(Error::format(n, format!("duplicate merge {pair:?}")));
        }
        merges.push(pair);
    }

    let reserved_below = BYTE_TOKENS as usize + merges.len();
    for (token, n) in special_tokens.iter().zip(special_lines) {
        if (token.id as usize) < reserved_below {
            return Err(Error::format(
                n,
                format!(
                    "special token id {} collides with the byte/merge range [0, {})",
                    token.id, reserved_below
                ),
            ));
        }
    }

    Ok(ModelFile {
        pattern,
        special_tokens,
        merges,
    })
}

fn parse_merge(line: &str) -> Option<Pair> {
    let mut fields = line.split_whitespace();
    let left = fields.next()?.parse().ok()?;
    let right = fields.next()?.parse().ok()?;
    match fields.next() {
        Some(_) => None,
        None => Some((left, right)),
    }
}

#[derive(Serialize)]
struct VocabEntry {
    id: Rank,
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    merged_from: Option<[String; 2]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    special: bool,
}

#[derive(Serialize)]
struct VocabFile {
    vocab: Vec<VocabEntry>,
}

/// Human-readable dump of the vocabulary in ascending id order.
pub fn write_vocab_json<W: Write>(bpe: &BPE, writer: &mut W) -> Result<()> {
    let vocab = bpe.get_vocab();
    let render = |id: Rank| vocab.get(id).map(render_token).unwrap_or_default();

    let entries = vocab
        .sorted()
        .into_iter()
        .map(|(id, bytes)| {
            let special = bpe.added_tokens().iter().any(|t| t.id == id);
            let merged_from = if special {
                None
            } else {
                id.checked_sub(BYTE_TOKENS)
                    .and_then(|rank| bpe.merges().get(rank as usize))
                    .map(|&(left, right)| [render(left), render(right)])
            };
            VocabEntry {
                id,
                token: render_token(bytes),
                merged_from,
                special,
            }
        })
        .collect();

    serde_json::to_writer_pretty(&mut *writer, &VocabFile { vocab: entries })?;
    writeln!(writer)?;
    Ok(())
}
