//! Configuration resolution for cmdpipe.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/cmdpipe/settings.json`)
//! 3. Project config (`.cmdpipe/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Settings files may be partial. A later layer only overrides the keys it
//! actually contains.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::process::ExecOptions;
use crate::stream::DEFAULT_CHUNK_SIZE;

/// Complete cmdpipe configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub exec: ExecSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

/// Defaults for every command run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecSettings {
    pub shell: PathBuf,
    pub shell_args: Vec<String>,
    pub chunk_size: usize,
    pub poll_interval_ms: u64,
    pub terminate_grace_ms: u64,
    pub max_line_bytes: Option<usize>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            shell_args: vec!["-c".to_string()],
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval_ms: 200,
            terminate_grace_ms: 250,
            max_line_bytes: None,
        }
    }
}

impl ExecSettings {
    pub fn to_options(&self) -> ExecOptions {
        ExecOptions {
            shell: self.shell.clone(),
            shell_args: self.shell_args.clone(),
            chunk_size: self.chunk_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
            max_line_bytes: self.max_line_bytes,
            ..ExecOptions::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    load_config_from(global_config_path().as_deref(), project_dir, |key| {
        std::env::var(key).ok()
    })
}

/// [`load_config`] with the global file location and the environment lookup
/// supplied by the caller.
pub fn load_config_from(
    global_path: Option<&Path>,
    project_dir: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global_path {
        if path.exists() {
            merge_json(&mut merged, load_config_file(path)?);
        }
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            merge_json(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env);
    config.exec.to_options().validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cmdpipe").join("settings.json"))
}

pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".cmdpipe").join("settings.json")
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

/// Recursively overlay `overlay` onto `base`. Objects merge key by key,
/// everything else replaces.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("CMDPIPE_SHELL") {
        config.exec.shell = PathBuf::from(val);
    }
    if let Some(n) = parse_env(&env, "CMDPIPE_CHUNK_SIZE") {
        config.exec.chunk_size = n;
    }
    if let Some(n) = parse_env(&env, "CMDPIPE_POLL_INTERVAL_MS") {
        config.exec.poll_interval_ms = n;
    }
    if let Some(n) = parse_env(&env, "CMDPIPE_TERMINATE_GRACE_MS") {
        config.exec.terminate_grace_ms = n;
    }
    if let Some(n) = parse_env(&env, "CMDPIPE_MAX_LINE_BYTES") {
        config.exec.max_line_bytes = Some(n);
    }
    if let Some(val) = env("CMDPIPE_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(json) = parse_env(&env, "CMDPIPE_LOG_JSON") {
        config.logging.json = json;
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    raw.trim().parse().map_or_else(
        |_| {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        },
        Some,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_settings(dir: &Path, json: &str) -> PathBuf {
        let path = project_config_path(dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn default_config_matches_exec_defaults() {
        let config = Config::default();
        let options = config.exec.to_options();
        let defaults = ExecOptions::default();
        assert_eq!(options.chunk_size, defaults.chunk_size);
        assert_eq!(options.poll_interval, defaults.poll_interval);
        assert_eq!(options.terminate_grace, defaults.terminate_grace);
        assert_eq!(options.shell, defaults.shell);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let config = load_config_from(Some(missing.as_path()), Some(dir.path()), no_env).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn project_overrides_only_present_keys() {
        let global_dir = tempfile::tempdir().unwrap();
        let global = global_dir.path().join("settings.json");
        std::fs::write(&global, r#"{"exec": {"chunk_size": 512, "poll_interval_ms": 50}}"#).unwrap();

        let project = tempfile::tempdir().unwrap();
        write_settings(project.path(), r#"{"exec": {"chunk_size": 64}, "logging": {"json": true}}"#);

        let config = load_config_from(Some(global.as_path()), Some(project.path()), no_env).unwrap();
        assert_eq!(config.exec.chunk_size, 64);
        assert_eq!(config.exec.poll_interval_ms, 50);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn env_beats_files() {
        let project = tempfile::tempdir().unwrap();
        write_settings(project.path(), r#"{"exec": {"chunk_size": 64}}"#);
        let env: HashMap<&str, &str> = [
            ("CMDPIPE_CHUNK_SIZE", "128"),
            ("CMDPIPE_SHELL", "/bin/bash"),
            ("CMDPIPE_MAX_LINE_BYTES", "1024"),
            ("CMDPIPE_LOG_LEVEL", "debug"),
            ("CMDPIPE_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let config = load_config_from(None, Some(project.path()), |k| {
            env.get(k).map(ToString::to_string)
        })
        .unwrap();
        assert_eq!(config.exec.chunk_size, 128);
        assert_eq!(config.exec.shell, PathBuf::from("/bin/bash"));
        assert_eq!(config.exec.max_line_bytes, Some(1024));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn unparsable_env_is_ignored() {
        let config = load_config_from(None, None, |k| {
            (k == "CMDPIPE_CHUNK_SIZE").then(|| "lots".to_string())
        })
        .unwrap();
        assert_eq!(config.exec.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let project = tempfile::tempdir().unwrap();
        write_settings(project.path(), "{not json");
        let err = load_config_from(None, Some(project.path()), no_env).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Failed to parse")));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let project = tempfile::tempdir().unwrap();
        write_settings(project.path(), r#"{"exec": {"chunk_size": 0}}"#);
        assert!(load_config_from(None, Some(project.path()), no_env).is_err());
    }
}
