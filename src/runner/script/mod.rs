//! Tests declared as YAML files whose hooks are shell commands.
//!
//! ```yaml
//! description: user can log in
//! tags: [smoke, auth]
//! pages: [common.login]
//! data:
//!   - user: alice
//! setup: ./seed-db.sh
//! tests:
//!   - name: test_login
//!     run: |
//!       echo "STEP: open $ENV_URL"
//!       login "$DATA_USER" || exit 1
//! teardown: ./clean-db.sh
//! ```

pub mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::ImportError;
use crate::plan::test_id::TestId;
use crate::runner::definition::{Hook, TestDefinition, TestLoader};
use crate::runner::script::process::{HOOK_TIMEOUT, ShellHook};

pub const TEST_EXTENSION: &str = "yaml";
pub const DATA_EXTENSION: &str = "csv";
pub const PAGE_EXTENSION: &str = "sh";

/// `skip: true` or `skip: "reason"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SkipDecl {
    Flag(bool),
    Reason(String),
}

#[derive(Debug, Clone, Deserialize)]
struct TestFunctionDecl {
    name: String,
    run: String,
}

/// On-disk shape of a script test.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptTestFile {
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    skip: Option<SkipDecl>,
    #[serde(default)]
    pages: Vec<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    setup: Option<String>,
    #[serde(default)]
    tests: Vec<TestFunctionDecl>,
    #[serde(default)]
    teardown: Option<String>,
}

/// Loads tests from `tests/<dotted/path>.yaml` and pages from
/// `pages/<dotted/path>.sh`.
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    pub tests_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub shell: String,
    /// Per-hook limit.
    pub timeout: Duration,
}

impl ScriptLoader {
    pub fn new(tests_dir: impl Into<PathBuf>, pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            tests_dir: tests_dir.into(),
            pages_dir: pages_dir.into(),
            shell: "/bin/sh".to_string(),
            timeout: HOOK_TIMEOUT,
        }
    }

    fn test_path(&self, id: &TestId) -> PathBuf {
        id.to_path(&self.tests_dir, TEST_EXTENSION)
    }

    fn resolve_pages(&self, pages: &[String]) -> Result<Vec<PathBuf>, ImportError> {
        pages
            .iter()
            .map(|page| {
                let id: TestId = page
                    .parse()
                    .map_err(|_| ImportError::new(format!("invalid page name \"{page}\""), ""))?;
                let path = id.to_path(&self.pages_dir, PAGE_EXTENSION);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(ImportError::new(
                        format!("page {page} does not exist"),
                        format!("expected {}", path.display()),
                    ))
                }
            })
            .collect()
    }

    fn hook(&self, name: &str, command: String, pages: &[PathBuf]) -> Hook {
        let shell = Arc::new(ShellHook {
            shell: self.shell.clone(),
            command,
            pages: pages.to_vec(),
            timeout: self.timeout,
        });
        Hook::new(name, move |ctx| shell.run(ctx))
    }
}

impl TestLoader for ScriptLoader {
    fn exists(&self, id: &TestId) -> bool {
        self.test_path(id).is_file()
    }

    fn discover(&self, prefix: Option<&TestId>) -> Vec<TestId> {
        let root = match prefix {
            Some(prefix) => prefix.to_dir(&self.tests_dir),
            None => self.tests_dir.clone(),
        };
        let mut found: Vec<TestId> = WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| has_extension(entry.path(), TEST_EXTENSION))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.tests_dir).ok()?;
                TestId::from_relative_path(relative).ok()
            })
            .collect();
        found.sort();
        found
    }

    fn load(&self, id: &TestId) -> Result<TestDefinition, ImportError> {
        let path = self.test_path(id);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            ImportError::new(format!("test {id} could not be read"), e.to_string())
        })?;
        let file: ScriptTestFile = if raw.trim().is_empty() {
            ScriptTestFile::default()
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|e| ImportError::new(format!("test {id} is not valid"), e.to_string()))?
        };
        let pages = self.resolve_pages(&file.pages)?;

        let mut definition = TestDefinition::new(id.clone())
            .with_description(file.description)
            .with_tags(file.tags);
        definition.skip = match file.skip {
            Some(SkipDecl::Flag(true)) => Some(String::new()),
            Some(SkipDecl::Reason(reason)) => Some(reason),
            Some(SkipDecl::Flag(false)) | None => None,
        };
        if let Some(data) = file.data {
            definition = definition.with_data(data);
        }
        definition.setup = file.setup.map(|cmd| self.hook("setup", cmd, &pages));
        definition.tests = file
            .tests
            .into_iter()
            .map(|t| self.hook(&t.name, t.run, &pages))
            .collect();
        definition.teardown = file.teardown.map(|cmd| self.hook("teardown", cmd, &pages));
        Ok(definition)
    }

    fn external_data(&self, id: &TestId) -> Option<PathBuf> {
        let path = id.to_path(&self.tests_dir, DATA_EXTENSION);
        path.is_file().then_some(path)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(s: &str) -> TestId {
        s.parse().unwrap()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn project() -> (TempDir, ScriptLoader) {
        let dir = tempfile::tempdir().unwrap();
        let loader = ScriptLoader::new(dir.path().join("tests"), dir.path().join("pages"));
        (dir, loader)
    }

    #[test]
    fn discovers_yaml_tests_sorted() {
        let (dir, loader) = project();
        write(dir.path(), "tests/b.yaml", "tests: []");
        write(dir.path(), "tests/auth/login.yaml", "tests: []");
        write(dir.path(), "tests/auth/login.csv", "user\nalice\n");
        write(dir.path(), "tests/auth/notes.txt", "");
        assert_eq!(loader.discover(None), vec![id("auth.login"), id("b")]);
        assert_eq!(loader.discover(Some(&id("auth"))), vec![id("auth.login")]);
        assert!(loader.exists(&id("auth.login")));
        assert!(!loader.exists(&id("auth.notes")));
    }

    #[test]
    fn discover_missing_directory_is_empty() {
        let (_dir, loader) = project();
        assert!(loader.discover(Some(&id("nothing"))).is_empty());
    }

    #[test]
    fn loads_full_definition() {
        let (dir, loader) = project();
        write(dir.path(), "pages/common/login.sh", "true\n");
        write(
            dir.path(),
            "tests/auth/login.yaml",
            r#"
description: user can log in
tags: [smoke]
skip: flaky on CI
pages: [common.login]
data:
  - user: alice
  - user: bob
setup: "true"
tests:
  - name: test_one
    run: "true"
  - name: test_two
    run: "true"
teardown: "true"
"#,
        );
        let def = loader.load(&id("auth.login")).unwrap();
        assert_eq!(def.description, "user can log in");
        assert_eq!(def.tags, vec!["smoke"]);
        assert_eq!(def.skip.as_deref(), Some("flaky on CI"));
        assert_eq!(def.data.as_ref().map(Vec::len), Some(2));
        assert!(def.setup.is_some() && def.teardown.is_some());
        let names: Vec<_> = def.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["test_one", "test_two"]);
    }

    #[test]
    fn empty_file_is_an_empty_test() {
        let (dir, loader) = project();
        write(dir.path(), "tests/a.yaml", "");
        let def = loader.load(&id("a")).unwrap();
        assert!(def.tests.is_empty());
        assert!(def.skip.is_none());
    }

    #[test]
    fn skip_flag_forms() {
        let (dir, loader) = project();
        write(dir.path(), "tests/a.yaml", "skip: true");
        write(dir.path(), "tests/b.yaml", "skip: false");
        assert_eq!(loader.load(&id("a")).unwrap().skip.as_deref(), Some(""));
        assert!(loader.load(&id("b")).unwrap().skip.is_none());
    }

    #[test]
    fn missing_page_is_import_error() {
        let (dir, loader) = project();
        write(dir.path(), "tests/a.yaml", "pages: [nowhere]");
        let err = loader.load(&id("a")).unwrap_err();
        assert_eq!(err.message, "page nowhere does not exist");
    }

    #[test]
    fn malformed_yaml_is_import_error() {
        let (dir, loader) = project();
        write(dir.path(), "tests/a.yaml", "tests: [unclosed");
        let err = loader.load(&id("a")).unwrap_err();
        assert_eq!(err.message, "test a is not valid");
        assert!(!err.description.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let (dir, loader) = project();
        write(dir.path(), "tests/a.yaml", "setpu: echo typo");
        assert!(loader.load(&id("a")).is_err());
    }

    #[test]
    fn external_data_next_to_test() {
        let (dir, loader) = project();
        write(dir.path(), "tests/a.yaml", "");
        assert!(loader.external_data(&id("a")).is_none());
        write(dir.path(), "tests/a.csv", "x\n1\n");
        assert_eq!(
            loader.external_data(&id("a")),
            Some(dir.path().join("tests").join("a.csv"))
        );
    }
}
