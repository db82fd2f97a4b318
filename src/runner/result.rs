use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReportError;
use crate::project::settings::Dict;

/// File name of a unit's result inside its report directory.
pub const UNIT_REPORT_FILE: &str = "report.json";

/// The outcome of a unit, including interim and abnormal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
    Error,
    CodeError,
    Skipped,
    Pending,
    Running,
    NotRun,
    Stopped,
}

impl ResultStatus {
    /// Results that trip the run-wide failure flag.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failure | Self::Error | Self::CodeError)
    }

    /// The unit never produced a result of its own.
    pub fn is_abnormal(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::NotRun | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::CodeError => "code_error",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::NotRun => "not_run",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A step logged by test code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub message: String,
    pub screenshot: Option<String>,
}

/// An error recorded against a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub description: String,
}

/// The persisted result of one unit (`report.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: String,
    pub result: ResultStatus,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub browser: String,
    /// Data set values, each stringified.
    #[serde(default)]
    pub test_data: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub set_name: String,
    /// Seconds.
    #[serde(default)]
    pub test_elapsed_time: f64,
    #[serde(default)]
    pub test_timestamp: String,
}

impl TestResult {
    /// Write to `<dir>/report.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if serialization or the write fails.
    pub fn write(&self, dir: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(UNIT_REPORT_FILE), json)?;
        Ok(())
    }

    /// Read `<dir>/report.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the file is missing or malformed.
    pub fn read(dir: &Path) -> Result<Self, ReportError> {
        let raw = std::fs::read_to_string(dir.join(UNIT_REPORT_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Stringify data set values for the report; strings are kept verbatim.
pub fn stringify_data(data: &Dict) -> BTreeMap<String, String> {
    data.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
