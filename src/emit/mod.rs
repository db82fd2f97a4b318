pub mod junit;

use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ReportError};
use crate::report::execution::{EXECUTION_REPORT_FILE, ExecutionReport};

/// JUnit file written next to the aggregate `report.json`.
pub const JUNIT_REPORT_FILE: &str = "report.xml";

/// Output format requested for an execution report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Junit,
}

impl FromStr for ReportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "junit" => Ok(Self::Junit),
            _ => Err(ConfigError::UnknownReportFormat(s.to_owned())),
        }
    }
}

/// Where report copies go besides the execution directory.
#[derive(Debug, Clone, Default)]
pub struct ReportOutput<'a> {
    pub formats: &'a [ReportFormat],
    pub folder: Option<&'a Path>,
    /// File stem of the copies; the timestamp when absent.
    pub name: Option<&'a str>,
}

/// Write the requested report files. The aggregate `report.json` itself
/// is written by the aggregator; this adds `report.xml` and the copies
/// in `output.folder`.
///
/// # Errors
///
/// Returns [`ReportError`] if a file cannot be written.
pub fn write_reports(
    report: &ExecutionReport,
    execution_dir: &Path,
    suite_name: &str,
    timestamp: &str,
    output: &ReportOutput<'_>,
) -> Result<(), ReportError> {
    let junit = output
        .formats
        .contains(&ReportFormat::Junit)
        .then(|| junit::generate_junit_report(report, suite_name, timestamp));

    if let Some(xml) = &junit {
        std::fs::write(execution_dir.join(JUNIT_REPORT_FILE), xml)?;
    }

    let Some(folder) = output.folder else {
        return Ok(());
    };
    std::fs::create_dir_all(folder)?;
    let stem = output.name.unwrap_or(timestamp);
    if output.formats.contains(&ReportFormat::Json) {
        std::fs::copy(
            execution_dir.join(EXECUTION_REPORT_FILE),
            folder.join(format!("{stem}.json")),
        )?;
    }
    if let Some(xml) = &junit {
        std::fs::write(folder.join(format!("{stem}.xml")), xml)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::directory::ExecutionTarget;
    use crate::report::execution::{ExecutionParams, generate_execution_report};

    #[test]
    fn parses_formats() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!(" JUnit ".parse::<ReportFormat>().unwrap(), ReportFormat::Junit);
        assert!(matches!(
            "html".parse::<ReportFormat>(),
            Err(ConfigError::UnknownReportFormat(_))
        ));
    }

    #[test]
    fn junit_written_next_to_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let report = generate_execution_report(
            dir.path(),
            ExecutionTarget::Suite("smoke"),
            0.0,
            ExecutionParams::default(),
            false,
        )
        .unwrap();
        let output = ReportOutput {
            formats: &[ReportFormat::Junit],
            ..ReportOutput::default()
        };
        write_reports(&report, dir.path(), "smoke", "ts", &output).unwrap();
        assert!(dir.path().join(JUNIT_REPORT_FILE).is_file());
    }

    #[test]
    fn copies_go_to_report_folder() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let report = generate_execution_report(
            dir.path(),
            ExecutionTarget::Suite("smoke"),
            0.0,
            ExecutionParams::default(),
            false,
        )
        .unwrap();
        let output = ReportOutput {
            formats: &[ReportFormat::Json, ReportFormat::Junit],
            folder: Some(out.path()),
            name: None,
        };
        write_reports(&report, dir.path(), "smoke", "ts", &output).unwrap();
        assert!(out.path().join("ts.json").is_file());
        assert!(out.path().join("ts.xml").is_file());

        let named = ReportOutput {
            formats: &[ReportFormat::Json],
            folder: Some(out.path()),
            name: Some("nightly"),
        };
        write_reports(&report, dir.path(), "smoke", "ts", &named).unwrap();
        assert!(out.path().join("nightly.json").is_file());
        assert!(!out.path().join("nightly.xml").exists());
    }
}
