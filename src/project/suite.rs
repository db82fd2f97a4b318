use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A suite file: an ordered list of tests plus execution parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    /// Test ids, or `prefix.*` / `*` patterns.
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default)]
    pub browsers: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub processes: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Shell command run once before any unit.
    #[serde(default)]
    pub before: Option<String>,
    /// Shell command run once after every unit.
    #[serde(default)]
    pub after: Option<String>,
}

impl SuiteDefinition {
    /// Parse a suite from its YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFile`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&raw).map_err(|message| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_suite() {
        let suite = SuiteDefinition::from_yaml(
            r#"
tests:
  - auth.login
  - cart.*
browsers: [chrome, firefox]
environments: [staging]
processes: 3
tags: [smoke]
before: echo before
after: echo after
"#,
        )
        .unwrap();
        assert_eq!(suite.tests, vec!["auth.login", "cart.*"]);
        assert_eq!(suite.browsers, vec!["chrome", "firefox"]);
        assert_eq!(suite.processes, Some(3));
        assert_eq!(suite.before.as_deref(), Some("echo before"));
    }

    #[test]
    fn empty_suite_file_is_default() {
        assert_eq!(SuiteDefinition::from_yaml("").unwrap(), SuiteDefinition::default());
    }

    #[test]
    fn unknown_shape_is_an_error() {
        assert!(SuiteDefinition::from_yaml("tests: 3").is_err());
    }
}
