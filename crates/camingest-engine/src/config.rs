//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    IDLE_POLL_MS, MAX_SESSIONS, OPEN_ATTEMPTS, OPEN_RETRY_DELAY_MS, SHUTDOWN_TIMEOUT_MS,
    STOP_TIMEOUT_MS, WATCHDOG_MS,
};

/// Tunables for the reader registry and its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of registry slots.
    pub max_sessions: usize,

    /// Open attempts before a new session fails.
    pub open_attempts: u32,

    /// Delay between open attempts.
    pub open_retry_delay_ms: u64,

    /// Sleep while no consumer is registered.
    pub idle_poll_ms: u64,

    /// No-data watchdog window.
    pub watchdog_ms: u64,

    /// Wait for one session thread on stop.
    pub stop_timeout_ms: u64,

    /// Wait for all session threads on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
            open_attempts: OPEN_ATTEMPTS,
            open_retry_delay_ms: OPEN_RETRY_DELAY_MS,
            idle_poll_ms: IDLE_POLL_MS,
            watchdog_ms: WATCHDOG_MS,
            stop_timeout_ms: STOP_TIMEOUT_MS,
            shutdown_timeout_ms: SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_sessions": 4, "watchdog_ms": 1000}"#).unwrap();
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.watchdog(), Duration::from_secs(1));
        assert_eq!(config.open_attempts, OPEN_ATTEMPTS);
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));
    }
}
