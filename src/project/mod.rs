pub mod settings;
pub mod suite;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::plan::test_id::TestId;

use self::settings::{Dict, Settings};
use self::suite::SuiteDefinition;

/// Root directory holding `projects/` and the global `settings.json`.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Locate a project by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProject`] if the project directory is missing.
    pub fn project(&self, name: &str) -> Result<Project, ConfigError> {
        let root = self.root.join("projects").join(name);
        if name.is_empty() || !root.is_dir() {
            return Err(ConfigError::UnknownProject(name.to_owned()));
        }
        Ok(Project {
            name: name.to_owned(),
            root,
            global_settings: self.settings_path(),
        })
    }
}

/// A project directory and the locations of everything it contains.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
    global_settings: PathBuf,
}

impl Project {
    /// A project rooted at `root` with no workspace-level settings.
    pub fn at(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: name.into(),
            global_settings: root.join(".no-global-settings"),
            root,
        }
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.root.join("tests")
    }

    pub fn suites_dir(&self) -> PathBuf {
        self.root.join("suites")
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join("pages")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        Settings::load(&self.global_settings, &self.root.join("settings.json"))
    }

    pub fn environments(&self) -> Result<BTreeMap<String, Dict>, ConfigError> {
        settings::load_environments(&self.root.join("environments.json"))
    }

    pub fn secrets(&self) -> Result<Dict, ConfigError> {
        settings::load_secrets(&self.root.join("secrets.json"))
    }

    pub fn suite_path(&self, suite: &TestId) -> PathBuf {
        suite.to_path(&self.suites_dir(), "yaml")
    }

    pub fn suite_exists(&self, suite: &TestId) -> bool {
        self.suite_path(suite).is_file()
    }

    /// Load a suite definition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSuite`] if no such suite file exists.
    pub fn suite(&self, suite: &TestId) -> Result<SuiteDefinition, ConfigError> {
        let path = self.suite_path(suite);
        if !path.is_file() {
            return Err(ConfigError::UnknownSuite(suite.to_string()));
        }
        SuiteDefinition::from_file(&path)
    }

    /// Path of a test-tree directory given as `.`/empty (the whole tree),
    /// a dot path, or a slash path relative to `tests/`.
    pub fn test_directory(&self, dir: &str) -> PathBuf {
        let trimmed = dir.trim().trim_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return self.tests_dir();
        }
        if trimmed.contains('/') {
            self.tests_dir().join(trimmed)
        } else {
            let mut path = self.tests_dir();
            path.extend(trimmed.split('.'));
            path
        }
    }
}
