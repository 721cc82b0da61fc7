//! Byte-level byte-pair-encoding tokenizer.
//!
//! Learns an ordered list of merge rules from a corpus and uses it to map text
//! to token ids and back. See [`tokenizer::BPE`] for the entry point.

pub mod tokenizer;
