//! Effective configuration with provenance
//!
//! Captures the merged client configuration, every source that contributed
//! to it, and the typed settings the watcher runs with. The merged object is
//! redacted before it is ever shown; the typed settings keep the token.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::{BuiltinDefaults, ClientSettings};
use super::merge::merge_layers;

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "headless-logs/effective_config@1";

const MAX_RETRY_DELAY_MS: u64 = 600_000;
const MAX_CONNECT_TIMEOUT_SECONDS: u64 = 300;

/// Key fragments whose values never leave the process.
const SECRET_KEYS: &[&str] = &["token", "password", "secret", "credential"];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Cli,
}

/// One layer that went into the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// Only set for file layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Hex SHA-256 of the file bytes, only set for file layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ConfigSource {
    fn inline(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
        }
    }
}

/// The merged client configuration and where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// Merged configuration with secrets replaced by a marker.
    pub config: Value,

    /// Layers, lowest precedence first.
    pub sources: Vec<ConfigSource>,

    /// Keys whose values were redacted.
    pub redactions: Vec<String>,

    #[serde(skip)]
    pub settings: ClientSettings,
}

/// `~/.config/headless-logs/config.toml`, if `HOME` is set.
pub fn default_user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/headless-logs/config.toml"))
}

impl EffectiveConfig {
    /// Merge built-in defaults, the user file (skipped if it does not
    /// exist) and CLI overrides, then validate.
    pub fn build(user_config_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![(ConfigSource::inline(ConfigOrigin::Builtin), BuiltinDefaults::default().to_value())];

        if let Some(path) = user_config_path.filter(|p| p.exists()) {
            layers.push(read_user_layer(path)?);
        }
        if let Some(cli) = cli_overrides {
            layers.push((ConfigSource::inline(ConfigOrigin::Cli), cli));
        }

        let (sources, values): (Vec<_>, Vec<_>) = layers.into_iter().unzip();
        let mut config = merge_layers(values);
        let settings = validate(&config)?;
        let redactions = redact(&mut config);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            redactions,
            settings,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Top-level value of the shown (redacted) configuration.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

fn read_user_layer(path: &Path) -> Result<(ConfigSource, Value), ConfigError> {
    let bytes = std::fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let text = std::str::from_utf8(&bytes)
        .map_err(|e| ConfigError::ParseError(format!("{}: not UTF-8: {}", path.display(), e)))?;
    let value: Value =
        toml::from_str(text).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

    let source = ConfigSource {
        origin: ConfigOrigin::User,
        path: Some(path.display().to_string()),
        digest: Some(digest),
    };
    Ok((source, value))
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEYS.iter().any(|fragment| key.contains(fragment))
}

/// Replace secret scalar values, returning the dotted paths touched.
fn redact(config: &mut Value) -> Vec<String> {
    let mut redacted = Vec::new();
    let mut pending = vec![(String::new(), config)];

    while let Some((prefix, value)) = pending.pop() {
        let Value::Object(map) = value else { continue };
        for (key, value) in map.iter_mut() {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                Value::Object(_) => pending.push((path, value)),
                Value::Null | Value::Array(_) => {}
                _ if is_secret_key(key) => {
                    *value = Value::String(REDACTED.to_string());
                    redacted.push(path);
                }
                _ => {}
            }
        }
    }

    redacted.sort();
    redacted
}

fn validate(config: &Value) -> Result<ClientSettings, ConfigError> {
    let settings: ClientSettings =
        serde_json::from_value(config.clone()).map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    if !(1..=MAX_RETRY_DELAY_MS).contains(&settings.retry_delay_ms) {
        return Err(ConfigError::ValidationError(format!(
            "retry_delay_ms must be in (0, {}], got {}",
            MAX_RETRY_DELAY_MS, settings.retry_delay_ms
        )));
    }
    if !(1..=MAX_CONNECT_TIMEOUT_SECONDS).contains(&settings.connect_timeout_seconds) {
        return Err(ConfigError::ValidationError(format!(
            "connect_timeout_seconds must be in (0, {}], got {}",
            MAX_CONNECT_TIMEOUT_SECONDS, settings.connect_timeout_seconds
        )));
    }
    if settings.server_url.trim().is_empty() {
        return Err(ConfigError::ValidationError("server_url must not be empty".to_string()));
    }
    if !(settings.server_url.starts_with("http://") || settings.server_url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "server_url '{}' is not an http(s) URL",
            settings.server_url
        )));
    }

    Ok(settings)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
