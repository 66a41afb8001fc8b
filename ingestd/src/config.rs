//! Daemon configuration file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use camingest_engine::EngineConfig;
use camingest_types::{StreamConfig, Transport};

/// Top-level configuration: engine tunables plus the stream list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

impl DaemonConfig {
    /// Load and parse a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Two synthetic cameras, used when no file is given.
    pub fn demo() -> Self {
        Self {
            engine: EngineConfig::default(),
            streams: vec![
                StreamConfig::new("demo-tcp", "stub://demo-tcp?fps=25&audio=true", Transport::Tcp),
                StreamConfig::new(
                    "demo-udp",
                    "stub://demo-udp?fps=15&timestamps=missing",
                    Transport::Udp,
                ),
            ],
        }
    }
}
