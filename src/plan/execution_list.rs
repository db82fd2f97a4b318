use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::plan::browser::BrowserDefinition;
use crate::plan::data::resolve_data_sets;
use crate::plan::environment::merge_environment;
use crate::plan::test_id::TestId;
use crate::project::settings::Dict;
use crate::runner::definition::TestLoader;

/// One concrete (test, data set, environment, browser) combination.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub test_name: TestId,
    /// Owned copy; may carry an `env` object with the environment `name`.
    pub data_set: Dict,
    pub secrets: Arc<Dict>,
    pub browser: BrowserDefinition,
    /// Assigned by the report directory manager before the unit runs.
    pub report_dir: Option<PathBuf>,
}

/// Expand tests into units, iterating test → data set → environment →
/// browser from outermost to innermost. Output order follows that nesting.
pub fn build_execution_list(
    loader: &dyn TestLoader,
    tests: &[TestId],
    browsers: &[BrowserDefinition],
    envs: &[String],
    project_envs: &BTreeMap<String, Dict>,
    secrets: &Dict,
) -> Vec<ExecutionUnit> {
    let secrets = Arc::new(secrets.clone());
    let mut units = Vec::new();

    for test in tests {
        for data_set in resolve_data_sets(loader, test) {
            for env in envs {
                let data_set = merge_environment(&data_set, env, project_envs);
                for browser in browsers {
                    units.push(ExecutionUnit {
                        test_name: test.clone(),
                        data_set: data_set.clone(),
                        secrets: Arc::clone(&secrets),
                        browser: browser.clone(),
                        report_dir: None,
                    });
                }
            }
        }
    }

    units
}
