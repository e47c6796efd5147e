//! Server configuration.
//!
//! Layered as defaults → TOML file → environment / CLI flags. The file
//! uses kebab-case keys; websocket settings live in their own table:
//!
//! ```toml
//! port = 8380
//! shards = 1
//!
//! [websocket]
//! max-write-response-retries = 3
//! write-response-timeout-ms = 10000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cinder_core::registry::DEFAULT_MIGRATED;
use cinder_core::{CommandSet, EngineConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::write::WritePolicy;

pub const DEFAULT_PORT: u16 = 8380;

/// Commands refused over the websocket by default.
pub const DEFAULT_UNIMPLEMENTED: &[&str] = &["QUNWATCH"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CinderConfig {
    pub bind: String,
    pub port: u16,
    pub shards: usize,
    pub shard_channel_buffer: usize,
    /// Serve prometheus metrics at `/metrics`.
    pub metrics: bool,
    pub websocket: WebsocketConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct WebsocketConfig {
    pub max_write_response_retries: u32,
    pub write_response_timeout_ms: u64,
    pub retry_backoff_base_ms: u64,
    pub retry_jitter_ms: u64,
    /// Commands answered with native values rather than RESP bytes.
    pub migrated_commands: Vec<String>,
    /// Commands refused with a fixed notice.
    pub unimplemented_commands: Vec<String>,
}

impl Default for CinderConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            shards: 1,
            shard_channel_buffer: cinder_core::manager::DEFAULT_SHARD_BUFFER,
            metrics: false,
            websocket: WebsocketConfig::default(),
        }
    }
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        let policy = WritePolicy::default();
        Self {
            max_write_response_retries: policy.max_retries,
            write_response_timeout_ms: policy.attempt_timeout.as_millis() as u64,
            retry_backoff_base_ms: policy.backoff_base.as_millis() as u64,
            retry_jitter_ms: policy.jitter.as_millis() as u64,
            migrated_commands: DEFAULT_MIGRATED.iter().map(|s| s.to_string()).collect(),
            unimplemented_commands: DEFAULT_UNIMPLEMENTED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CinderConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks values that parse fine but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 || self.shards > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid {
                field: "shards",
                reason: format!("must be between 1 and {}, got {}", u16::MAX, self.shards),
            });
        }
        if self.shard_channel_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "shard-channel-buffer",
                reason: "must be at least 1".into(),
            });
        }
        if self.websocket.max_write_response_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "max-write-response-retries",
                reason: "must be at least 1".into(),
            });
        }
        if self.websocket.write_response_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "write-response-timeout-ms",
                reason: "must be at least 1".into(),
            });
        }
        self.bind_addr().map(|_| ())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.parse().map_err(|e| ConfigError::Invalid {
            field: "bind",
            reason: format!("'{}': {e}", self.bind),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn migrated(&self) -> CommandSet {
        CommandSet::new(&self.websocket.migrated_commands)
    }

    pub fn unimplemented(&self) -> CommandSet {
        CommandSet::new(&self.websocket.unimplemented_commands)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            shard_count: self.shards,
            channel_buffer: self.shard_channel_buffer,
            migrated: self.migrated(),
            ..EngineConfig::default()
        }
    }

    pub fn write_policy(&self) -> WritePolicy {
        let ws = &self.websocket;
        WritePolicy {
            max_retries: ws.max_write_response_retries,
            attempt_timeout: Duration::from_millis(ws.write_response_timeout_ms),
            backoff_base: Duration::from_millis(ws.retry_backoff_base_ms),
            jitter: Duration::from_millis(ws.retry_jitter_ms),
        }
    }
}
