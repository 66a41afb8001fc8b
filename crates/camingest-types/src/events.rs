//! Events emitted by the ingestion engine.

use serde::{Deserialize, Serialize};

use crate::state::{SessionState, StopReason};
use crate::types::SessionId;

/// Events the engine sends to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IngestEvent {
    /// A session was spawned.
    SessionStarted {
        id: SessionId,
        name: String,
        dedicated: bool,
    },

    /// A session changed state.
    StateChanged {
        id: SessionId,
        name: String,
        previous: SessionState,
        current: SessionState,
    },

    /// A session thread exited.
    SessionStopped {
        id: SessionId,
        name: String,
        reason: StopReason,
    },
}
