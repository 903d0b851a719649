//! Orchestrator configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use negsync_core::AuthorKey;
use negsync_proto::SyncConfig;

use crate::error::{Error, Result};

/// Configuration for a [`SyncOrchestrator`](crate::SyncOrchestrator).
///
/// ```json
/// {
///   "endpoints": ["wss://relay-a.example", "wss://relay-b.example"],
///   "author": "<64 hex chars>",
///   "sync": { "sync_timeout_ms": 60000 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Endpoint urls synced by a full run.
    pub endpoints: Vec<String>,
    /// Hex author key. May instead be set at runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Per-session settings.
    pub sync: SyncConfig,
}

impl OrchestratorConfig {
    pub fn new(endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate().map_err(Error::Config)?;
        if let Some(url) = self.endpoints.iter().find(|u| u.trim().is_empty()) {
            return Err(Error::Config(format!("empty endpoint url {url:?}")));
        }
        self.author_key()?;
        Ok(())
    }

    /// The configured author, decoded.
    pub fn author_key(&self) -> Result<Option<AuthorKey>> {
        self.author
            .as_deref()
            .map(|hex| {
                AuthorKey::from_hex(hex).map_err(|e| Error::Config(format!("author: {e}")))
            })
            .transpose()
    }
}
