use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ReportError;
use crate::logging::INFO_LOG_FILE;
use crate::plan::test_id::TestId;
use crate::report::directory::{ExecutionTarget, SET_PREFIX, SINGLE_TESTS_DIR, set_ordinal};
use crate::runner::result::{ResultStatus, TestResult};

/// Cached aggregate written at the end of a run.
pub const EXECUTION_REPORT_FILE: &str = "report.json";
/// Older name of the cached aggregate; still read.
pub const LEGACY_EXECUTION_REPORT_FILE: &str = "execution_report.json";

/// One unit, flattened for the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub module: String,
    pub sub_modules: Vec<String>,
    pub name: String,
    pub full_name: String,
    pub result: ResultStatus,
    #[serde(default)]
    pub elapsed_time: f64,
    #[serde(default)]
    pub start_date_time: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub set_name: String,
}

/// Parameters a run was started with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub browsers: Vec<String>,
    pub processes: usize,
    pub environments: Vec<String>,
    pub tags: Vec<String>,
    pub remote_url: String,
}

/// Summary across every unit of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub tests: Vec<TestSummary>,
    pub total_tests: usize,
    pub totals_by_result: BTreeMap<ResultStatus, usize>,
    pub net_elapsed_time: f64,
    #[serde(default)]
    pub params: ExecutionParams,
    pub has_finished: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl ExecutionReport {
    fn from_tests(tests: Vec<TestSummary>) -> Self {
        let mut totals_by_result = BTreeMap::new();
        for test in &tests {
            *totals_by_result.entry(test.result).or_insert(0) += 1;
        }
        Self {
            total_tests: tests.len(),
            tests,
            totals_by_result,
            ..Self::default()
        }
    }

    pub fn count(&self, status: ResultStatus) -> usize {
        self.totals_by_result.get(&status).copied().unwrap_or(0)
    }
}

/// How unit directories are arranged below an execution directory.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Layout {
    /// `<test>/<set>/`
    Suite,
    /// `<set>/` for the named test.
    SingleTest(String),
}

impl Layout {
    fn of(target: ExecutionTarget<'_>) -> Self {
        match target {
            ExecutionTarget::Suite(_) => Self::Suite,
            ExecutionTarget::Test(test) => Self::SingleTest(test.to_string()),
        }
    }

    /// Single-test executions live at `single_tests/<test>/<timestamp>`.
    fn infer(execution_dir: &Path) -> Self {
        let test_dir = execution_dir.parent();
        let under_single_tests = test_dir
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .is_some_and(|name| name == SINGLE_TESTS_DIR);
        match test_dir.and_then(Path::file_name) {
            Some(test) if under_single_tests => Self::SingleTest(test.to_string_lossy().into_owned()),
            _ => Self::Suite,
        }
    }
}

/// Read the execution data of `execution_dir`.
///
/// A cached aggregate is returned as is. Without one the directory tree
/// is walked; units lacking a `report.json` show as pending and
/// `has_finished` is false.
pub fn get_execution_data(execution_dir: &Path) -> ExecutionReport {
    for name in [EXECUTION_REPORT_FILE, LEGACY_EXECUTION_REPORT_FILE] {
        let path = execution_dir.join(name);
        if !path.is_file() {
            continue;
        }
        match read_cached(&path) {
            Ok(report) => return report,
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable execution report"),
        }
    }
    walk(execution_dir, &Layout::infer(execution_dir), false)
}

fn read_cached(path: &Path) -> Result<ExecutionReport, ReportError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Build the final aggregate of a run and cache it as `report.json`.
/// Units without a result become STOPPED if they were started, NOT_RUN
/// otherwise.
///
/// # Errors
///
/// Returns [`ReportError`] if the aggregate cannot be written.
pub fn generate_execution_report(
    execution_dir: &Path,
    target: ExecutionTarget<'_>,
    elapsed_time: f64,
    params: ExecutionParams,
    interrupted: bool,
) -> Result<ExecutionReport, ReportError> {
    let mut report = walk(execution_dir, &Layout::of(target), true);
    report.net_elapsed_time = (elapsed_time * 1000.0).round() / 1000.0;
    report.params = params;
    report.interrupted = interrupted;
    report.has_finished = true;

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(execution_dir.join(EXECUTION_REPORT_FILE), json)?;
    debug!(dir = %execution_dir.display(), tests = report.total_tests, "execution report written");
    Ok(report)
}

/// Subdirectories of `dir`, sorted by name.
fn subdirs(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
}

fn is_set_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with(SET_PREFIX)
}

/// Summaries in execution-list order. Set directories without an
/// ordinal sort after the others, by name.
fn walk(execution_dir: &Path, layout: &Layout, finalize: bool) -> ExecutionReport {
    let mut units = Vec::new();
    let mut collect = |test_name: &str, test_dir: &Path| {
        for set_dir in subdirs(test_dir).filter(is_set_dir) {
            let ordinal = set_ordinal(&set_dir.file_name().to_string_lossy()).unwrap_or(usize::MAX);
            units.push((ordinal, summarize(test_name, set_dir.path(), finalize)));
        }
    };

    match layout {
        Layout::SingleTest(test_name) => collect(test_name, execution_dir),
        Layout::Suite => {
            for test_dir in subdirs(execution_dir) {
                let test_name = test_dir.file_name().to_string_lossy().into_owned();
                collect(&test_name, test_dir.path());
            }
        }
    }

    units.sort_by_key(|(ordinal, _)| *ordinal);
    ExecutionReport::from_tests(units.into_iter().map(|(_, summary)| summary).collect())
}

fn summarize(test_name: &str, set_dir: &Path, finalize: bool) -> TestSummary {
    let id = test_name.parse::<TestId>().ok();
    let (module, sub_modules, name) = match &id {
        Some(id) => (
            id.module().to_owned(),
            id.sub_modules().to_vec(),
            id.name().to_owned(),
        ),
        None => (String::new(), Vec::new(), test_name.to_owned()),
    };
    let token = set_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut summary = TestSummary {
        module,
        sub_modules,
        name,
        full_name: test_name.to_owned(),
        result: ResultStatus::Pending,
        elapsed_time: 0.0,
        start_date_time: String::new(),
        browser: String::new(),
        data: BTreeMap::new(),
        environment: String::new(),
        set_name: token,
    };

    match TestResult::read(set_dir) {
        Ok(result) => {
            summary.result = result.result;
            summary.elapsed_time = result.test_elapsed_time;
            summary.start_date_time = result.test_timestamp;
            summary.browser = result.browser;
            summary.data = result.test_data;
            summary.environment = result.environment;
            if !result.set_name.is_empty() {
                summary.set_name = result.set_name;
            }
        }
        Err(_) if finalize => {
            summary.result = if set_dir.join(INFO_LOG_FILE).is_file() {
                ResultStatus::Stopped
            } else {
                ResultStatus::NotRun
            };
        }
        Err(_) => {}
    }
    summary
}
