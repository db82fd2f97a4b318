use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{HookError, ImportError};
use crate::plan::test_id::TestId;
use crate::project::settings::Dict;
use crate::runner::context::UnitContext;

/// Callable body of a hook or test function.
pub type HookFn = Arc<dyn Fn(&mut UnitContext) -> Result<(), HookError> + Send + Sync>;

/// A named hook or test function.
#[derive(Clone)]
pub struct Hook {
    pub name: String,
    pub body: HookFn,
}

impl Hook {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut UnitContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

/// A loaded, executable test: metadata plus setup, body functions and teardown.
#[derive(Debug, Clone)]
pub struct TestDefinition {
    pub id: TestId,
    pub description: String,
    /// `Some(reason)` when the test declares itself skipped.
    pub skip: Option<String>,
    pub tags: Vec<String>,
    /// In-file data declaration.
    pub data: Option<Vec<Dict>>,
    pub setup: Option<Hook>,
    pub tests: Vec<Hook>,
    pub teardown: Option<Hook>,
}

impl TestDefinition {
    pub fn new(id: TestId) -> Self {
        Self {
            id,
            description: String::new(),
            skip: None,
            tags: Vec::new(),
            data: None,
            setup: None,
            tests: Vec::new(),
            teardown: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_skip(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach in-file data: a single object or an array of objects.
    /// Non-object array entries are ignored.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = match data {
            Value::Object(map) => Some(vec![map]),
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        };
        self
    }

    pub fn with_setup<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut UnitContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.setup = Some(Hook::new("setup", body));
        self
    }

    pub fn with_test<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut UnitContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.tests.push(Hook::new(name, body));
        self
    }

    pub fn with_teardown<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut UnitContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.teardown = Some(Hook::new("teardown", body));
        self
    }
}

/// Source of executable test definitions.
///
/// Loaders own the mapping from [`TestId`] to storage; the unit runner is
/// agnostic to how a definition was obtained.
pub trait TestLoader: Send + Sync {
    /// Whether a test with this id exists.
    fn exists(&self, id: &TestId) -> bool;

    /// All test ids under `prefix` (the whole tree when `None`), sorted.
    fn discover(&self, prefix: Option<&TestId>) -> Vec<TestId>;

    /// Load a test and resolve the pages it references.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError`] when the test or one of its pages cannot be loaded.
    fn load(&self, id: &TestId) -> Result<TestDefinition, ImportError>;

    /// Tabular data file dedicated to the test, if one exists.
    fn external_data(&self, id: &TestId) -> Option<PathBuf>;
}
