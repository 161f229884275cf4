//! Common error types for spikesort

use thiserror::Error;

/// Common result type for spikesort operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the spikesort crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested channel, unit or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (shapes, channel ids, property values)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed file content (binary recordings, probe files, tool output)
    #[error("Format error: {0}")]
    Format(String),
}
