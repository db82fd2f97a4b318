use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors. Any of these aborts a run before a unit executes.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("project \"{0}\" does not exist")]
    UnknownProject(String),

    #[error("browser \"{name}\" is not defined; valid options are: {}", valid.join(", "))]
    UnknownBrowser { name: String, valid: Vec<String> },

    #[error("environment \"{name}\" does not exist for project {project}")]
    UnknownEnvironment { name: String, project: String },

    #[error("suite \"{0}\" does not exist")]
    UnknownSuite(String),

    #[error("test \"{0}\" does not exist")]
    UnknownTest(String),

    #[error("directory \"{0}\" does not exist")]
    UnknownDirectory(String),

    #[error("suite {suite} references test \"{test}\" which does not exist")]
    InvalidSuiteReference { suite: String, test: String },

    #[error("invalid tag filter: {0}")]
    InvalidTagFilter(String),

    #[error("invalid identifier \"{0}\"")]
    InvalidIdentifier(String),

    #[error("failed to read {}: {message}", path.display())]
    InvalidFile { path: PathBuf, message: String },

    #[error("unknown report format '{0}' (expected: json, junit)")]
    UnknownReportFormat(String),
}

/// A test or page definition could not be loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ImportError {
    pub message: String,
    pub description: String,
}

impl ImportError {
    pub fn new(message: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            description: description.into(),
        }
    }
}

/// Failure raised by a hook or test function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// An assertion did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// Any other runtime failure inside test code.
    #[error("{message}")]
    Code { message: String, description: String },
}

impl HookError {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    pub fn code(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Code {
            description: message.clone(),
            message,
        }
    }
}

/// Driver session failures.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no driver available for browser \"{0}\"")]
    Unavailable(String),

    #[error("webdriver request failed: {0}")]
    Request(String),

    #[error("unexpected webdriver response: {0}")]
    Response(String),
}

/// Failure reading or writing a report file.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a whole run. Per-unit failures never surface here.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not create execution directory {}: {source}", path.display())]
    ExecutionDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not write execution report: {0}")]
    Report(#[from] ReportError),
}
