//! Built-in defaults (layer 1) and the typed settings view.

use std::time::Duration;

use hlog_protocol::DEFAULT_RETRY_DELAY_MS;
use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Base URL of the log server (default: "http://127.0.0.1:8420")
    pub server_url: String,

    /// Delay between reconnect attempts in milliseconds (default: 2000)
    pub retry_delay_ms: u64,

    /// Resume from the delivered byte count on reconnect (default: true)
    pub resume: bool,

    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8420".to_string(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            resume: true,
            connect_timeout_seconds: 30,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "server_url": self.server_url,
            "retry_delay_ms": self.retry_delay_ms,
            "resume": self.resume,
            "connect_timeout_seconds": self.connect_timeout_seconds,
        })
    }
}

/// Typed view of the merged configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub server_url: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,

    pub retry_delay_ms: u64,

    pub resume: bool,

    pub connect_timeout_seconds: u64,
}

impl ClientSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}
