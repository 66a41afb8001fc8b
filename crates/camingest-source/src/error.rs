//! Error types for packet sources.

use thiserror::Error;

/// Errors that can occur while opening or reading a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source could not be opened.
    #[error("Open failed: {0}")]
    Open(String),

    /// Unsupported URL scheme.
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// Source reached end of stream.
    #[error("End of stream")]
    EndOfStream,

    /// No data available yet.
    #[error("Resource temporarily unavailable")]
    WouldBlock,

    /// Remote end dropped the connection.
    #[error("Connection lost: {0}")]
    Disconnected(String),

    /// Source was closed.
    #[error("Source closed")]
    Closed,

    /// Malformed or unexpected data from the remote end.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a reader should react to a read error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorClass {
    /// No data yet or end of stream.
    Idle,

    /// Transport failure; the connection may come back.
    Disconnect,

    /// Unrecoverable.
    Fatal,
}

impl SourceError {
    /// Classify this error for the read loop.
    pub fn class(&self) -> ReadErrorClass {
        match self {
            Self::EndOfStream | Self::WouldBlock => ReadErrorClass::Idle,
            Self::Disconnected(_) | Self::Closed => ReadErrorClass::Disconnect,
            Self::Io(err) => match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::UnexpectedEof => {
                    ReadErrorClass::Idle
                }
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted => ReadErrorClass::Disconnect,
                _ => ReadErrorClass::Fatal,
            },
            Self::Open(_) | Self::UnsupportedUrl(_) | Self::Protocol(_) => ReadErrorClass::Fatal,
        }
    }
}
