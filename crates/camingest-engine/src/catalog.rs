//! Stream configuration lookup.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use camingest_types::StreamConfig;

use crate::error::IngestError;
use crate::IngestResult;

/// Resolves a stream name to its configuration.
pub trait ConfigLookup: Send + Sync {
    /// Configuration for `name`, if the stream is known.
    fn stream_config(&self, name: &str) -> Option<StreamConfig>;
}

/// In-memory set of validated stream configurations.
#[derive(Debug, Default)]
pub struct StreamCatalog {
    streams: RwLock<HashMap<String, StreamConfig>>,
}

impl StreamCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from configurations; names must be unique.
    pub fn from_configs(configs: impl IntoIterator<Item = StreamConfig>) -> IngestResult<Self> {
        let catalog = Self::new();
        for config in configs {
            let name = config.name.clone();
            if catalog.insert(config)?.is_some() {
                return Err(IngestError::ConfigLoad(format!(
                    "duplicate stream name: {name}"
                )));
            }
        }
        Ok(catalog)
    }

    /// Parse a JSON array of stream configurations.
    pub fn from_json_str(json: &str) -> IngestResult<Self> {
        let configs: Vec<StreamConfig> =
            serde_json::from_str(json).map_err(|e| IngestError::ConfigLoad(e.to_string()))?;
        Self::from_configs(configs)
    }

    /// Load a JSON array of stream configurations from a file.
    pub fn load(path: impl AsRef<Path>) -> IngestResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| IngestError::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        let catalog = Self::from_json_str(&json)?;
        info!(path = %path.display(), streams = catalog.len(), "Loaded stream catalog");
        Ok(catalog)
    }

    /// Add or replace a stream; returns the previous configuration.
    pub fn insert(&self, config: StreamConfig) -> IngestResult<Option<StreamConfig>> {
        config.validate()?;
        debug!(stream = %config.name, url = %config.url, transport = %config.transport, "Catalog insert");
        Ok(self.streams.write().insert(config.name.clone(), config))
    }

    /// Sorted stream names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

impl ConfigLookup for StreamCatalog {
    fn stream_config(&self, name: &str) -> Option<StreamConfig> {
        self.streams.read().get(name).cloned()
    }
}
