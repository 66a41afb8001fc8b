//! Reader session state machine types.

use serde::{Deserialize, Serialize};

/// The current state of a reader session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Opening the source for the first time.
    #[default]
    Connecting,

    /// Reading and dispatching packets.
    Running,

    /// Recovering from a lost connection.
    Reconnecting {
        /// Consecutive attempt number, starting at 1.
        attempt: u32,
    },

    /// Session thread has exited.
    Stopped(StopReason),
}

impl SessionState {
    /// Returns true while the session is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the session is reconnecting.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting { .. })
    }

    /// Returns true once the session has stopped for any reason.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }

    /// Returns true if the session stopped because of a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Stopped(StopReason::Failed { .. }))
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Running => "Running",
            Self::Reconnecting { .. } => "Reconnecting",
            Self::Stopped(StopReason::Cancelled) => "Cancelled",
            Self::Stopped(StopReason::Failed { .. }) => "Failed",
        }
    }
}

/// Reason a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// An administrative stop was honored.
    Cancelled,

    /// The session gave up; a fresh start is required.
    Failed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::Cancelled => "Stopped by request".to_string(),
            Self::Failed { message } => format!("Failed: {message}"),
        }
    }
}
