// main.rs
//
// usage: bytepair_tokenizer <corpus> [vocab_size] [output_prefix] [min_frequency]
//
// `<corpus>` is either a JSONL file with one {"text": ...} object per line or
// a plain text file. Writes <output_prefix>.model and <output_prefix>.vocab.json.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use env_logger::Env;
use log::{info, warn};
use serde::Deserialize;

use bytepair_tokenizer::tokenizer::{
    AddedToken, BPE, BpeTrainer, Error, GPT4_SPLIT_PATTERN, PreTokenizer, Rank, RegexSplitter,
    Result, Trainer,
};

const DEFAULT_VOCAB_SIZE: usize = 4000;
const END_OF_TEXT: &str = "<|endoftext|>";

#[derive(Debug, Deserialize)]
struct DataEntry {
    text: String,
}

fn load_corpus(path: &Path) -> Result<Vec<String>> {
    if path.extension().is_some_and(|ext| ext == "jsonl") {
        let reader = BufReader::new(File::open(path)?);
        let mut texts = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DataEntry>(&line) {
                Ok(entry) => texts.push(entry.text),
                Err(e) => warn!("skipping line {} of {}: {}", i + 1, path.display(), e),
            }
        }
        Ok(texts)
    } else {
        Ok(vec![fs::read_to_string(path)?])
    }
}

fn parse_arg<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("invalid {name} {v:?}: {e}"))),
        None => Ok(default),
    }
}

/// `<|endoftext|>` takes the first id past the trained vocabulary.
fn end_of_text_token(vocab_size: usize) -> Result<AddedToken> {
    let id = Rank::try_from(vocab_size).map_err(|_| {
        Error::InvalidConfig(format!("vocab size {vocab_size} overflows token ids"))
    })?;
    Ok(AddedToken::new(END_OF_TEXT, id))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let dataset_path = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "src/dataset/full_datas.jsonl".to_string()),
    );
    let vocab_size = parse_arg(args.next(), "vocab size", DEFAULT_VOCAB_SIZE)?;
    let output_prefix = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "pretokenized_output/tokenizer".to_string()),
    );
    let min_frequency = parse_arg(args.next(), "min frequency", 1u64)?;
    let end_of_text = end_of_text_token(vocab_size)?;

    let texts = load_corpus(&dataset_path)?;
    info!("loaded {} texts from {}", texts.len(), dataset_path.display());

    let splitter = RegexSplitter::new(GPT4_SPLIT_PATTERN)?;
    let mut trainer = BpeTrainer::builder()
        .vocab_size(vocab_size)
        .min_frequency(min_frequency)
        .show_progress(true)
        .special_tokens(vec![end_of_text])
        .build();
    trainer.feed(texts.iter(), |text| {
        Ok(splitter
            .split(text)?
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect())
    })?;
    info!("{} distinct chunks in the corpus", trainer.words().len());

    let mut bpe = BPE::new(GPT4_SPLIT_PATTERN)?;
    trainer.train(&mut bpe)?;

    if let Some(dir) = output_prefix.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    bpe.save(&output_prefix)?;
    Ok(())
}
