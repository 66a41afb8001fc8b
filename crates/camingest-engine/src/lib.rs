//! Stream ingestion engine.
//!
//! This crate runs one reader session per camera stream, keeps each session
//! alive across disconnects, repairs packet timestamps, and hands packets to
//! registered consumers. Sessions are owned by a bounded [`ReaderRegistry`].

mod catalog;
mod config;
mod dispatch;
mod error;
mod metrics;
mod reconnect;
mod registry;
mod session;
mod timestamp;

#[cfg(test)]
mod testing;

pub use catalog::{ConfigLookup, StreamCatalog};
pub use config::EngineConfig;
pub use dispatch::{PacketCallback, PacketConsumer, StreamDescriptor};
pub use error::IngestError;
pub use metrics::SessionMetrics;
pub use reconnect::{looks_like_onvif, ReconnectDecision, ReconnectPolicy, ReconnectStrategy};
pub use registry::{ReaderRegistry, SessionInfo};
pub use session::SessionHandle;
pub use timestamp::{frame_duration, TimestampNormalizer, TimestampPolicy, TimestampRepair};

/// Result type for engine operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Default number of registry slots.
pub const MAX_SESSIONS: usize = 16;

/// Open attempts before a new session gives up.
pub const OPEN_ATTEMPTS: u32 = 5;

/// Delay between open attempts in milliseconds.
pub const OPEN_RETRY_DELAY_MS: u64 = 250;

/// Poll interval while no consumer is registered, in milliseconds.
pub const IDLE_POLL_MS: u64 = 5;

/// No-data watchdog window in milliseconds.
pub const WATCHDOG_MS: u64 = 30_000;

/// Wait for a single stopped session thread, in milliseconds.
pub const STOP_TIMEOUT_MS: u64 = 5_000;

/// Wait for all session threads during shutdown, in milliseconds.
pub const SHUTDOWN_TIMEOUT_MS: u64 = 3_000;
