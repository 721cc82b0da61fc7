// src/tokenizer/result.rs

use thiserror::Error;

use crate::tokenizer::Rank;

#[derive(Debug, Error)]
pub enum Error {
    /// Trainer or tokenizer was configured with values it cannot honour.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A token id that is neither a byte, a merge, nor a registered special token.
    #[error("Invalid token for decoding: {0}")]
    UnknownToken(Rank),
    /// A model file could not be parsed. `line` is 1-based, or 0 when the
    /// problem concerns the file as a whole.
    #[error("Malformed model file at line {line}: {message}")]
    Format { line: usize, message: String },
    #[error("Pre-tokenizer pattern error: {0}")]
    Pattern(#[from] fancy_regex::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_reports_line() {
        let err = Error::format(3, "expected an integer");
        assert_eq!(
            err.to_string(),
            "Malformed model file at line 3: expected an integer"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
