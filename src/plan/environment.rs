use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ConfigError;
use crate::project::settings::Dict;

/// Environment names to run against, first non-empty source wins:
/// CLI, suite, the alphabetically first project environment, and finally
/// a single blank name meaning "no environment".
pub fn resolve_environments(
    cli_envs: &[String],
    suite_envs: &[String],
    project_envs: &BTreeMap<String, Dict>,
) -> Vec<String> {
    if !cli_envs.is_empty() {
        cli_envs.to_vec()
    } else if !suite_envs.is_empty() {
        suite_envs.to_vec()
    } else if let Some(first) = project_envs.keys().next() {
        vec![first.clone()]
    } else {
        vec![String::new()]
    }
}

/// Check every non-blank name against the project's environments.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownEnvironment`] for the first unknown name.
pub fn validate_environments(
    names: &[String],
    project_envs: &BTreeMap<String, Dict>,
    project: &str,
) -> Result<(), ConfigError> {
    match names
        .iter()
        .find(|name| !name.is_empty() && !project_envs.contains_key(*name))
    {
        Some(name) => Err(ConfigError::UnknownEnvironment {
            name: name.clone(),
            project: project.to_owned(),
        }),
        None => Ok(()),
    }
}

/// A copy of `data_set` with the environment merged under `env`
/// (carrying the environment's own `name`). A blank name leaves the copy
/// untouched.
pub fn merge_environment(
    data_set: &Dict,
    env_name: &str,
    project_envs: &BTreeMap<String, Dict>,
) -> Dict {
    let mut merged = data_set.clone();
    if env_name.is_empty() {
        return merged;
    }
    let mut env = project_envs.get(env_name).cloned().unwrap_or_default();
    env.insert("name".to_owned(), Value::String(env_name.to_owned()));
    merged.insert("env".to_owned(), Value::Object(env));
    merged
}

/// Name of the environment embedded in a data set, blank if none.
pub fn environment_name(data_set: &Dict) -> &str {
    data_set
        .get("env")
        .and_then(|env| env.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}
