//! Error types for Gate

use thiserror::Error;

/// Result type for Gate core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Gate core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid selector pattern
    #[error("Invalid selector pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
