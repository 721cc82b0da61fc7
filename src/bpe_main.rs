// src/bpe_main.rs
//
// usage: bpe_main [model] [input] [output_dir]
//
// Encodes every line of `input` with a saved model, writing one JSON array of
// ids per line to encoded.txt and the decoded text to decoded.txt.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use env_logger::Env;
use log::{info, warn};

use bytepair_tokenizer::tokenizer::{BPE, Result};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let model_path = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "pretokenized_output/tokenizer.model".to_string()),
    );
    let test_path = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "pretokenized_output/test_data.txt".to_string()),
    );
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "pretokenized_output".to_string()));
    let encoded_path = out_dir.join("encoded.txt");
    let decoded_path = out_dir.join("decoded.txt");

    let bpe = BPE::from_file(&model_path)?;
    let allowed_special = bpe.special_tokens();

    let mut reader = BufReader::new(File::open(&test_path)?);
    let mut enc_w = BufWriter::new(File::create(&encoded_path)?);
    let mut dec_w = BufWriter::new(File::create(&decoded_path)?);

    let mut total_tokens = 0usize;
    let mut total_bytes = 0usize;
    let mut raw_line = String::new();

    while reader.read_line(&mut raw_line)? > 0 {
        let line = raw_line.trim_end_matches(['\r', '\n']);

        let tokens = bpe.encode(line, &allowed_special)?;
        total_tokens += tokens.len();
        total_bytes += line.len();
        serde_json::to_writer(&mut enc_w, &tokens)?;
        writeln!(enc_w)?;

        let text = bpe.decode(&tokens)?;
        if text != line {
            warn!("line did not round-trip: {:?}", line);
        }
        writeln!(dec_w, "{}", text)?;

        raw_line.clear();
    }

    enc_w.flush()?;
    dec_w.flush()?;

    info!(
        "{} tokens written to {} ({:.2} bytes per token)",
        total_tokens,
        encoded_path.display(),
        total_bytes as f64 / total_tokens.max(1) as f64
    );
    Ok(())
}
