//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen: SocketAddr,
    /// Base URL published in stream endpoint metadata.
    pub public_url: String,
    /// Inventory file backing the entity store and tokens.
    pub inventory: PathBuf,
    /// Root of `<instance_id>/<terminal_id>.log` files.
    pub log_root: PathBuf,
    /// Poll interval while following a running instance.
    pub poll_interval_ms: u64,
    /// Size of a single log file read.
    pub read_chunk_bytes: usize,
    /// Emit JSON log lines.
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let listen = SocketAddr::from(([127, 0, 0, 1], 8420));
        Self {
            listen,
            public_url: format!("http://{}", listen),
            inventory: PathBuf::from("inventory.toml"),
            log_root: PathBuf::from("logs"),
            poll_interval_ms: 250,
            read_chunk_bytes: 16 * 1024,
            json_logs: false,
        }
    }
}

/// Errors loading the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ServerConfig {
    /// Load from a TOML file; missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, ServerConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ServerConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ServerConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ServerConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.read_chunk_bytes == 0 {
            return Err(ServerConfigError::InvalidValue {
                field: "read_chunk_bytes",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            return Err(ServerConfigError::InvalidValue {
                field: "public_url",
                reason: format!("'{}' is not an http(s) URL", self.public_url),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
