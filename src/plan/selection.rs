use std::collections::HashSet;

use crate::error::ConfigError;
use crate::plan::test_id::TestId;
use crate::runner::definition::TestLoader;

/// Expand a suite's `tests` entries into test ids.
///
/// `prefix.*` expands to every discovered test under `prefix` and `*` to
/// the whole tree, both in sorted order. Duplicates keep their first
/// occurrence.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSuiteReference`] for an entry naming a
/// test that does not exist.
pub fn expand_suite_tests(
    loader: &dyn TestLoader,
    suite: &str,
    entries: &[String],
) -> Result<Vec<TestId>, ConfigError> {
    let invalid = |entry: &str| ConfigError::InvalidSuiteReference {
        suite: suite.to_owned(),
        test: entry.to_owned(),
    };

    let mut seen = HashSet::new();
    let mut tests = Vec::new();
    for entry in entries {
        let entry = entry.trim();
        let expanded = if entry == "*" {
            loader.discover(None)
        } else if let Some(prefix) = entry.strip_suffix(".*") {
            let prefix: TestId = prefix.parse().map_err(|_| invalid(entry))?;
            loader.discover(Some(&prefix))
        } else {
            let id: TestId = entry.parse().map_err(|_| invalid(entry))?;
            if !loader.exists(&id) {
                return Err(invalid(entry));
            }
            vec![id]
        };
        for id in expanded {
            if seen.insert(id.clone()) {
                tests.push(id);
            }
        }
    }
    Ok(tests)
}
