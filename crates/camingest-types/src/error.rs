//! Error types for stream configuration.

use thiserror::Error;

/// Errors found while validating a stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Stream name is empty.
    #[error("Stream name must not be empty")]
    EmptyName,

    /// Stream name exceeds the maximum length.
    #[error("Stream name is {len} bytes, maximum is {max}")]
    NameTooLong { len: usize, max: usize },

    /// Stream URL is empty.
    #[error("Stream {0} has no URL")]
    EmptyUrl(String),
}
