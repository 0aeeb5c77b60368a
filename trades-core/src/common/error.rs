use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    /// The input file could not be decoded with the configured encoding
    /// (or the UTF-8 fallback). Nothing in the file can be trusted, so the
    /// whole run aborts.
    #[error("failed to decode input file: {0}")]
    FileDecode(String),

    /// A single row is missing a required column or carries an unparsable
    /// value. Row-local: the row is reported as failed, the run continues.
    #[error("row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("holding creation failed for {code}: {message}")]
    HoldingCreation { code: String, message: String },

    /// The remote API signalled throttling. `retry_after` is the server's
    /// hint when it sent one.
    #[error("rate limited by remote API")]
    Throttled { retry_after: Option<Duration> },

    #[error("remote API error: {message}")]
    Remote { message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;
