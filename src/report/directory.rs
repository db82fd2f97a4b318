use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::warn;

use crate::plan::execution_list::ExecutionUnit;
use crate::plan::test_id::TestId;

/// Prefix of per-unit report directories.
pub const SET_PREFIX: &str = "set_";
/// Directory holding single-test executions under `reports/`.
pub const SINGLE_TESTS_DIR: &str = "single_tests";

const TOKEN_ATTEMPTS: usize = 16;

/// Execution timestamp, e.g. `2026.10.19.14.03.07.512`. Sorts
/// chronologically and doubles as the execution directory name.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y.%m.%d.%H.%M.%S%.3f").to_string()
}

pub fn new_timestamp() -> String {
    format_timestamp(Local::now())
}

/// What an execution directory is keyed by.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionTarget<'a> {
    /// A suite or directory run, keyed by the suite name.
    Suite(&'a str),
    /// A single-test run.
    Test(&'a TestId),
}

/// Path of the execution directory without creating it.
pub fn execution_directory(reports_dir: &Path, timestamp: &str, target: ExecutionTarget<'_>) -> PathBuf {
    match target {
        ExecutionTarget::Suite(suite) => reports_dir.join(suite).join(timestamp),
        ExecutionTarget::Test(test) => reports_dir
            .join(SINGLE_TESTS_DIR)
            .join(test.to_string())
            .join(timestamp),
    }
}

/// Create (or reuse) `reports/<suite>/<timestamp>/` or
/// `reports/single_tests/<test>/<timestamp>/`. Existing content is kept.
///
/// # Errors
///
/// Returns the underlying I/O error if the directory cannot be created.
pub fn create_execution_directory(
    reports_dir: &Path,
    timestamp: &str,
    target: ExecutionTarget<'_>,
) -> io::Result<PathBuf> {
    let path = execution_directory(reports_dir, timestamp, target);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Allocate a fresh `set_<ordinal>_<token>` directory for one unit,
/// nested under the test name for suite runs. `ordinal` is the unit's
/// position in the execution list.
///
/// # Errors
///
/// Returns the underlying I/O error, or `AlreadyExists` if no unused
/// token was found.
pub fn create_report_directory(
    execution_dir: &Path,
    test: &TestId,
    is_suite: bool,
    ordinal: usize,
) -> io::Result<PathBuf> {
    let parent = if is_suite {
        execution_dir.join(test.to_string())
    } else {
        execution_dir.to_path_buf()
    };
    std::fs::create_dir_all(&parent)?;

    for _ in 0..TOKEN_ATTEMPTS {
        let path = parent.join(format!("{SET_PREFIX}{ordinal:04}_{}", set_token()));
        match std::fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no unused set token found",
    ))
}

/// Assign a report directory to every unit. Failures are logged and leave
/// the unit without a directory.
pub fn allocate_report_directories(execution_dir: &Path, units: &mut [ExecutionUnit], is_suite: bool) {
    for (ordinal, unit) in units.iter_mut().enumerate() {
        match create_report_directory(execution_dir, &unit.test_name, is_suite, ordinal) {
            Ok(dir) => unit.report_dir = Some(dir),
            Err(e) => {
                warn!(test = %unit.test_name, error = %e, "could not create report directory");
            }
        }
    }
}

/// Execution-list position encoded in a set directory name, if any.
pub fn set_ordinal(name: &str) -> Option<usize> {
    let (ordinal, _) = name.strip_prefix(SET_PREFIX)?.split_once('_')?;
    ordinal.parse().ok()
}

/// 12 hex characters.
fn set_token() -> String {
    format!("{:012x}", rand::random::<u64>() & 0xffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn id(s: &str) -> TestId {
        s.parse().unwrap()
    }

    #[test]
    fn timestamp_format() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Local, 2026, 10, 19, 14, 3, 7).unwrap();
        assert_eq!(format_timestamp(at), "2026.10.19.14.03.07.000");
    }

    #[test]
    fn suite_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            create_execution_directory(dir.path(), "2026.01.01", ExecutionTarget::Suite("smoke"))
                .unwrap();
        assert_eq!(path, dir.path().join("smoke").join("2026.01.01"));
        assert!(path.is_dir());
    }

    #[test]
    fn single_test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let test = id("auth.login");
        let path =
            create_execution_directory(dir.path(), "ts", ExecutionTarget::Test(&test)).unwrap();
        assert_eq!(path, dir.path().join("single_tests").join("auth.login").join("ts"));
    }

    #[test]
    fn execution_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first =
            create_execution_directory(dir.path(), "ts", ExecutionTarget::Suite("s")).unwrap();
        std::fs::write(first.join("marker"), "x").unwrap();
        let second =
            create_execution_directory(dir.path(), "ts", ExecutionTarget::Suite("s")).unwrap();
        assert_eq!(first, second);
        assert!(second.join("marker").exists());
    }

    #[test]
    fn report_directories_are_unique_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        let test = id("auth.login");
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let path = create_report_directory(dir.path(), &test, true, 7).unwrap();
            assert_eq!(path.parent().unwrap(), dir.path().join("auth.login"));
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("set_0007_"));
            assert_eq!(name.len(), "set_0007_".len() + 12);
            assert_eq!(set_ordinal(&name), Some(7));
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn single_test_sets_sit_directly_under_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_report_directory(dir.path(), &id("t"), false, 0).unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
    }

    #[test]
    fn allocation_failure_leaves_unit_without_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();
        let mut units = vec![ExecutionUnit {
            test_name: id("t"),
            data_set: Default::default(),
            secrets: Default::default(),
            browser: crate::plan::browser::BrowserDefinition {
                name: "chrome".into(),
                full_name: None,
                remote: false,
                capabilities: Default::default(),
            },
            report_dir: None,
        }];
        allocate_report_directories(&blocker, &mut units, true);
        assert!(units[0].report_dir.is_none());
    }

    #[test]
    fn set_ordinal_parsing() {
        assert_eq!(set_ordinal("set_0012_a1b2c3d4e5f6"), Some(12));
        assert_eq!(set_ordinal("set_12345_a1b2c3d4e5f6"), Some(12345));
        assert_eq!(set_ordinal("set_a1b2c3d4e5f6"), None);
        assert_eq!(set_ordinal("set_cookie"), None);
        assert_eq!(set_ordinal("login"), None);
    }
}
