//! Shared types for the camingest workspace.
//!
//! This crate defines the stream configuration, session state and event
//! types exchanged between the ingestion engine and its administrative
//! callers.

mod error;
mod events;
mod state;
mod types;

pub use error::ConfigError;
pub use events::IngestEvent;
pub use state::{SessionState, StopReason};
pub use types::{SessionId, SessionStats, StreamConfig, StreamKind, Transport, MAX_STREAM_NAME};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (Engine → observers).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<IngestEvent>, Receiver<IngestEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
