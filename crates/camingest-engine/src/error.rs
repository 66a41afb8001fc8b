//! Error types for the ingestion engine.

use std::time::Duration;

use thiserror::Error;

use camingest_source::SourceError;
use camingest_types::ConfigError;

/// Errors that can occur while running reader sessions.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No configuration known for the stream.
    #[error("Stream not found: {0}")]
    ConfigNotFound(String),

    /// Configuration rejected.
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    /// Every registry slot is taken.
    #[error("No free reader slot ({capacity} in use)")]
    ResourceExhausted { capacity: usize },

    /// Source could not be opened within the retry bound.
    #[error("Failed to open stream {stream} after {attempts} attempts: {source}")]
    OpenFailed {
        stream: String,
        attempts: u32,
        #[source]
        source: SourceError,
    },

    /// Source has no video stream.
    #[error("No video stream found in {0}")]
    NoVideoStream(String),

    /// No data was received for the whole watchdog window.
    #[error("No data from stream {stream} for {window:?}")]
    ReadTimeout { stream: String, window: Duration },

    /// Unrecoverable read error.
    #[error("Failed to read from stream {stream}: {source}")]
    ReadFailed {
        stream: String,
        #[source]
        source: SourceError,
    },

    /// A reconnect attempt failed; retried per policy.
    #[error("Reconnect attempt {attempt} for {stream} failed: {reason}")]
    ReconnectFailed {
        stream: String,
        attempt: u32,
        reason: String,
    },

    /// Session thread did not confirm exit in time.
    #[error("Reader thread for {stream} did not exit within {timeout:?}")]
    JoinTimeout { stream: String, timeout: Duration },

    /// Reader thread could not be spawned.
    #[error("Failed to spawn reader thread: {0}")]
    Spawn(#[from] std::io::Error),
}
