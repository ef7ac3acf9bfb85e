//! Configuration resolution for Veil.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/veil/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files are merged key by key, so a file that only sets `relay.addr` leaves
//! every other value from the lower layers intact.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Veil configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where the relay lives and how hard to try reaching it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub addr: String,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3001".to_string(),
            reconnect_base_delay_ms: 3000,
            max_reconnect_attempts: 5,
        }
    }
}

/// Per-session defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Room lifetime requested by `create` when none is given.
    pub default_duration_secs: u32,
    /// Delay before a self-destruct message is evicted.
    pub self_destruct_secs: u64,
    /// `"chacha20"` or `"chacha20-poly1305"`. Both peers must match.
    pub cipher_suite: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 300,
            self_destruct_secs: 10,
            cipher_suite: "chacha20".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.addr.trim().is_empty() {
            return Err(Error::Config("relay.addr must not be empty".into()));
        }
        if self.relay.reconnect_base_delay_ms == 0 {
            return Err(Error::Config(
                "relay.reconnect_base_delay_ms must be positive".into(),
            ));
        }
        if self.session.self_destruct_secs == 0 {
            return Err(Error::Config(
                "session.self_destruct_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let global = global_config_path().filter(|p| p.exists());
    let config = load_layers(global.as_deref(), explicit_path, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Resolve config from an optional global file, an optional explicit file and
/// an environment lookup. An explicit path that does not exist is an error.
pub fn load_layers(
    global_path: Option<&Path>,
    explicit_path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global_path {
        merge_values(&mut merged, load_config_file(path)?);
    }
    if let Some(path) = explicit_path {
        merge_values(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env)?;
    Ok(config)
}

/// Get the global config directory path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".veil").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/veil/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("veil").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}")))
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(val) = env("VEIL_RELAY_ADDR") {
        config.relay.addr = val;
    }
    if let Some(val) = env("VEIL_RECONNECT_BASE_DELAY_MS") {
        config.relay.reconnect_base_delay_ms = parse_env("VEIL_RECONNECT_BASE_DELAY_MS", &val)?;
    }
    if let Some(val) = env("VEIL_MAX_RECONNECT_ATTEMPTS") {
        config.relay.max_reconnect_attempts = parse_env("VEIL_MAX_RECONNECT_ATTEMPTS", &val)?;
    }
    if let Some(val) = env("VEIL_SESSION_DURATION_SECS") {
        config.session.default_duration_secs = parse_env("VEIL_SESSION_DURATION_SECS", &val)?;
    }
    if let Some(val) = env("VEIL_CIPHER_SUITE") {
        config.session.cipher_suite = val;
    }
    if let Some(val) = env("VEIL_LOG_LEVEL") {
        config.log.level = val;
    }
    if let Some(val) = env("VEIL_LOG_JSON") {
        config.log.json = parse_env("VEIL_LOG_JSON", &val)?;
    }
    Ok(())
}
