//! Engine configuration.
//!
//! Stored as JSON; every field is optional and falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::progress::DEFAULT_SPEED_SAMPLES;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::types::TransferOptions;

/// Errors produced while loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunables of a [`FileTransferEngine`](crate::FileTransferEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Invokes allowed per chunk before giving up.
    pub max_attempts: u32,
    /// Reconnect the transport after a connection loss.
    pub reconnect_on_disconnect: bool,
    /// Throughput samples kept for rate and ETA smoothing.
    pub speed_samples: usize,
    /// Default chunk length; `None` uses the largest the transport allows.
    pub chunk_length: Option<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reconnect_on_disconnect: true,
            speed_samples: DEFAULT_SPEED_SAMPLES,
            chunk_length: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads configuration from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "configuration file not found, using defaults"
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts);
        if self.reconnect_on_disconnect {
            policy
        } else {
            policy.without_reconnect()
        }
    }

    /// Fills in the configured chunk length when `options` leaves it open.
    pub fn apply(&self, options: &TransferOptions) -> TransferOptions {
        TransferOptions {
            chunk_length: options.chunk_length.or(self.chunk_length),
            ..*options
        }
    }
}
