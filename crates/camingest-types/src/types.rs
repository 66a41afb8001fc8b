//! Common types used across the engine and its callers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum length of a stream name in bytes.
pub const MAX_STREAM_NAME: usize = 64;

/// Network transport used to reach a camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// RTSP interleaved over TCP.
    #[default]
    Tcp,

    /// RTSP with RTP over UDP.
    Udp,
}

impl Transport {
    /// Returns a short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration of a single camera stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Unique stream name.
    pub name: String,

    /// Source URL (e.g., "rtsp://192.168.1.100:554/stream").
    pub url: String,

    /// Transport used to reach the source.
    #[serde(default)]
    pub transport: Transport,
}

impl StreamConfig {
    /// Create a new stream configuration.
    pub fn new(name: impl Into<String>, url: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            transport,
        }
    }

    /// Check the fields the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.name.len() > MAX_STREAM_NAME {
            return Err(ConfigError::NameTooLong {
                len: self.name.len(),
                max: MAX_STREAM_NAME,
            });
        }
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(self.name.clone()));
        }
        Ok(())
    }
}

/// Stable identifier of a registry slot.
///
/// The generation changes every time a slot is reused, so an identifier
/// held after its session was removed never matches a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    /// Slot index in the registry table.
    pub slot: usize,

    /// Generation of the slot when the session was created.
    pub generation: u64,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Logical kind of a dispatched stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Counters for one reader session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Packets successfully read from the source.
    pub packets_read: u64,

    /// Bytes of packet payload read.
    pub bytes_read: u64,

    /// Video packets handed to the consumer.
    pub video_dispatched: u64,

    /// Audio packets handed to the consumer.
    pub audio_dispatched: u64,

    /// Consumer invocations that returned an error.
    pub consumer_errors: u64,

    /// Packets whose timestamps were repaired.
    pub timestamps_repaired: u64,

    /// Reconnect attempts since the session started.
    pub reconnect_attempts: u64,

    /// Reconnects that brought the session back to running.
    pub reconnects: u64,

    /// Seconds since the session started.
    pub uptime_seconds: u64,
}
