//! Configuration resolution for `CliBroker`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/clibroker/settings.json`)
//! 3. Explicit config file (e.g. `--config` on the command line)
//! 4. Environment variables (highest priority)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete `CliBroker` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Flush policy for the broker and its sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Flush after every bare write.
    pub autoflush: bool,
    /// Default `autoflush` for sessions opened without an explicit setting.
    pub session_autoflush: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            autoflush: true,
            session_autoflush: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is layered over the global file and must exist when given.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(global_path);
    }
    if let Some(path) = explicit {
        layers.push(path.to_path_buf());
    }

    let mut config = load_config_layers(&layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Path to the global settings file: `<config dir>/clibroker/settings.json`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("clibroker").join("settings.json"))
}

/// Merge settings files in order; later files override individual keys of
/// earlier ones.
pub fn load_config_layers(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in paths {
        merge_json(&mut merged, read_json(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

/// Read and parse one settings file. Missing sections fall back to defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    serde_json::from_value(read_json(path)?).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `CLIBROKER_*` overrides looked up through `var`.
///
/// Boolean values accept `1/0`, `true/false`, `yes/no` and `on/off`;
/// anything else is ignored.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("CLIBROKER_AUTOFLUSH").as_deref().and_then(parse_bool) {
        config.broker.autoflush = val;
    }
    if let Some(val) = var("CLIBROKER_SESSION_AUTOFLUSH")
        .as_deref()
        .and_then(parse_bool)
    {
        config.broker.session_autoflush = val;
    }
    if let Some(val) = var("CLIBROKER_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = var("CLIBROKER_LOG_JSON").as_deref().and_then(parse_bool) {
        config.logging.json = val;
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config_flushes_bare_writes_only() {
        let config = Config::default();
        assert!(config.broker.autoflush);
        assert!(!config.broker.session_autoflush);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"broker": {"session_autoflush": true}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert!(config.broker.autoflush);
        assert!(config.broker.session_autoflush);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Failed to parse")));
    }

    #[test]
    fn missing_explicit_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Failed to read")));
    }

    #[test]
    fn later_layers_override_single_keys() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.json");
        let local = dir.path().join("local.json");
        std::fs::write(
            &global,
            r#"{"broker": {"autoflush": false}, "logging": {"level": "info"}}"#,
        )
        .unwrap();
        std::fs::write(&local, r#"{"logging": {"json": true}}"#).unwrap();

        let config = load_config_layers(&[global, local]).unwrap();
        assert!(!config.broker.autoflush);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.json);
    }

    #[test]
    fn wrong_value_type_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"broker": {"autoflush": "sometimes"}}"#).unwrap();

        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
        assert!(matches!(load_config_layers(&[path]), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CLIBROKER_AUTOFLUSH", "off"),
                ("CLIBROKER_SESSION_AUTOFLUSH", "1"),
                ("CLIBROKER_LOG_LEVEL", "clibroker_core=debug"),
                ("CLIBROKER_LOG_JSON", "yes"),
            ]),
        );
        assert!(!config.broker.autoflush);
        assert!(config.broker.session_autoflush);
        assert_eq!(config.logging.level, "clibroker_core=debug");
        assert!(config.logging.json);
    }

    #[test]
    fn unparseable_bool_is_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, env(&[("CLIBROKER_AUTOFLUSH", "maybe")]));
        assert!(config.broker.autoflush);
    }
}
