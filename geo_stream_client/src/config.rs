// Viewer configuration.
//
// `ViewerConfig` collects everything a deployment tunes: where the authoring
// server lives, what the viewer says when it connects, and how the pool
// retires objects. It is read from a JSON file (the same serde_json format the
// protocol uses); every field has a default, so an empty object `{}` is a
// valid config and a partial file overrides only what it names.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::DEFAULT_MAX_SLOT_GAP;
use crate::pool::EvictionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// `host:port` of the authoring server.
    pub server_addr: String,
    /// Name this viewer reports in its log lines.
    pub client_name: String,
    /// Sent once to the server right after connecting.
    pub greeting: String,
    /// Connect as soon as the session starts. When false the viewer runs
    /// offline until `connect()` is called explicitly.
    pub connect_on_start: bool,
    pub connect_timeout_ms: u64,
    /// Delay between consecutive destroy calls when a summary shrinks a pool.
    pub destroy_stagger_secs: f32,
    pub eviction: EvictionPolicy,
    /// Most handles one packet may pad to reach a slot past the end of its
    /// pool. Packets beyond it are rejected.
    pub max_slot_gap: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:12345".into(),
            client_name: "viewer".into(),
            greeting: "viewer connected".into(),
            connect_on_start: true,
            connect_timeout_ms: 5000,
            destroy_stagger_secs: 0.01,
            eviction: EvictionPolicy::Front,
            max_slot_gap: DEFAULT_MAX_SLOT_GAP,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server_addr is empty".into()));
        }
        if !(self.destroy_stagger_secs >= 0.0 && self.destroy_stagger_secs.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "destroy_stagger_secs must be a non-negative number, got {}",
                self.destroy_stagger_secs
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
