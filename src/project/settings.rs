use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// A JSON object: data sets, environment data, secrets, capabilities.
pub type Dict = Map<String, Value>;

/// Effective settings of a project: the workspace-level `settings.json`
/// overlaid by the project's own `settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_browser: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remote_browsers: BTreeMap<String, Dict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_log_level: Option<String>,
    /// Keys the engine does not interpret; handed to tests untouched.
    #[serde(flatten)]
    pub extra: Dict,
}

impl Settings {
    /// Load the layered settings. Missing files contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFile`] if a present file is not a JSON object.
    pub fn load(global: &Path, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = read_json_object(global)?;
        for (key, value) in read_json_object(project)? {
            merged.insert(key, value);
        }
        serde_json::from_value(Value::Object(merged)).map_err(|e| ConfigError::InvalidFile {
            path: project.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// The `cli_log_level` mapped to a tracing filter directive.
    pub fn log_filter(&self) -> Option<&'static str> {
        self.cli_log_level.as_deref().map(level_filter)
    }
}

/// Map a `cli_log_level` name to a tracing filter directive. Unknown
/// names fall back to `info`.
pub fn level_filter(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" | "WARN" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Named environments of a project: `environments.json`.
pub fn load_environments(path: &Path) -> Result<BTreeMap<String, Dict>, ConfigError> {
    read_json_object(path)?
        .into_iter()
        .map(|(name, data)| match data {
            Value::Object(map) => Ok((name, map)),
            Value::Null => Ok((name, Dict::new())),
            other => Err(ConfigError::InvalidFile {
                path: path.to_path_buf(),
                message: format!("environment \"{name}\" must be an object, got {other}"),
            }),
        })
        .collect()
}

/// Project secrets: `secrets.json`, passed to tests read-only.
pub fn load_secrets(path: &Path) -> Result<Dict, ConfigError> {
    read_json_object(path)
}

fn read_json_object(path: &Path) -> Result<Dict, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Dict::new()),
        Err(e) => {
            return Err(ConfigError::InvalidFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };
    if raw.trim().is_empty() {
        return Ok(Dict::new());
    }
    match serde_json::from_str(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::InvalidFile {
            path: path.to_path_buf(),
            message: "expected a JSON object".into(),
        }),
        Err(e) => Err(ConfigError::InvalidFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}
