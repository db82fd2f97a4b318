use std::path::{Path, PathBuf};

use crate::emit::ReportFormat;
use crate::plan::test_id::TestId;
use crate::project::Workspace;
use crate::report::directory::{ExecutionTarget, execution_directory};
use crate::report::execution::get_execution_data;
use crate::runner::dispatch::CancelToken;
use crate::runner::display::format_summary;
use crate::runner::execution::{ExecutionRunner, RunOptions};

/// Options for the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunCommand {
    pub workspace: PathBuf,
    pub project: String,
    pub target: String,
    pub browsers: Vec<String>,
    pub environments: Vec<String>,
    pub processes: Option<usize>,
    pub tags: Vec<String>,
    pub report: Vec<String>,
    pub report_folder: Option<PathBuf>,
    pub report_name: Option<String>,
    pub timestamp: Option<String>,
}

impl RunCommand {
    fn run_options(&self) -> Result<RunOptions, String> {
        let report_formats = self
            .report
            .iter()
            .map(|f| f.parse::<ReportFormat>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(RunOptions {
            browsers: split_list(&self.browsers),
            environments: split_list(&self.environments),
            processes: self.processes,
            tags: self.tags.clone(),
            report_formats,
            report_folder: self.report_folder.clone(),
            report_name: self.report_name.clone(),
            timestamp: self.timestamp.clone(),
        })
    }
}

/// Run the `run` command: execute a suite, test or directory and print
/// the summary line.
///
/// Returns `Ok(true)` if no unit failed and the run was not interrupted.
///
/// # Errors
///
/// Returns an error string for configuration errors or when the
/// execution directory or report cannot be written.
pub fn run_run(command: &RunCommand, cancel: CancelToken) -> Result<bool, String> {
    let options = command.run_options()?;
    let project = Workspace::new(&command.workspace)
        .project(&command.project)
        .map_err(|e| e.to_string())?;
    let runner = ExecutionRunner::new(project)
        .map_err(|e| e.to_string())?
        .with_cancel_token(cancel);

    let outcome = runner
        .run(&command.target, &options)
        .map_err(|e| e.to_string())?;

    println!("{}", format_summary(&outcome.report));
    println!("report: {}", outcome.execution_dir.display());
    Ok(!outcome.failed)
}

/// Run the `report` command: print the execution data of a past run as
/// JSON. `execution` is a suite name or, for single-test runs, a test id.
///
/// # Errors
///
/// Returns an error string if the project or execution does not exist.
pub fn run_report(
    workspace: &Path,
    project: &str,
    execution: &str,
    timestamp: &str,
) -> Result<String, String> {
    let project = Workspace::new(workspace)
        .project(project)
        .map_err(|e| e.to_string())?;
    let reports_dir = project.reports_dir();

    let suite_dir = execution_directory(&reports_dir, timestamp, ExecutionTarget::Suite(execution));
    let dir = if suite_dir.is_dir() {
        suite_dir
    } else {
        let test = execution.parse::<TestId>().map_err(|e| e.to_string())?;
        execution_directory(&reports_dir, timestamp, ExecutionTarget::Test(&test))
    };
    if !dir.is_dir() {
        return Err(format!("execution {execution} {timestamp} does not exist"));
    }

    let report = get_execution_data(&dir);
    serde_json::to_string_pretty(&report).map_err(|e| format!("failed to serialize report: {e}"))
}

/// Accept both repeated flags and comma-separated values.
fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}
