use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ImportError;
use crate::plan::test_id::TestId;
use crate::runner::definition::{TestDefinition, TestLoader};

/// In-process registry of test definitions.
///
/// Tests written as Rust closures are registered here under their dotted
/// id; lookup, discovery and external CSV data all come from the registry
/// instead of the filesystem.
#[derive(Debug, Default)]
pub struct RegistryLoader {
    tests: BTreeMap<TestId, TestDefinition>,
    csv: BTreeMap<TestId, PathBuf>,
}

impl RegistryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test. A later registration under the same id replaces
    /// the earlier one.
    pub fn register(&mut self, definition: TestDefinition) {
        self.tests.insert(definition.id.clone(), definition);
    }

    /// Attach an external CSV data file to a test.
    pub fn register_data(&mut self, id: TestId, csv: impl Into<PathBuf>) {
        self.csv.insert(id, csv.into());
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, definition: TestDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

impl TestLoader for RegistryLoader {
    fn exists(&self, id: &TestId) -> bool {
        self.tests.contains_key(id)
    }

    fn discover(&self, prefix: Option<&TestId>) -> Vec<TestId> {
        self.tests
            .keys()
            .filter(|id| prefix.is_none_or(|p| id.starts_with(p)))
            .cloned()
            .collect()
    }

    fn load(&self, id: &TestId) -> Result<TestDefinition, ImportError> {
        self.tests
            .get(id)
            .cloned()
            .ok_or_else(|| ImportError::new(format!("test {id} is not registered"), String::new()))
    }

    fn external_data(&self, id: &TestId) -> Option<PathBuf> {
        self.csv.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TestId {
        s.parse().unwrap()
    }

    fn registry() -> RegistryLoader {
        RegistryLoader::new()
            .with(TestDefinition::new(id("auth.login")))
            .with(TestDefinition::new(id("auth.logout")))
            .with(TestDefinition::new(id("cart.add")))
    }

    #[test]
    fn new_is_empty() {
        let reg = RegistryLoader::new();
        assert!(reg.is_empty());
        assert!(reg.discover(None).is_empty());
    }

    #[test]
    fn register_and_lookup() {
        let reg = registry();
        assert_eq!(reg.len(), 3);
        assert!(reg.exists(&id("auth.login")));
        assert!(!reg.exists(&id("auth")));
        assert_eq!(reg.load(&id("cart.add")).unwrap().id, id("cart.add"));
    }

    #[test]
    fn load_unknown_is_import_error() {
        let err = registry().load(&id("nope")).unwrap_err();
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn discover_is_sorted_and_filtered_by_prefix() {
        let reg = registry();
        assert_eq!(
            reg.discover(None),
            vec![id("auth.login"), id("auth.logout"), id("cart.add")]
        );
        assert_eq!(
            reg.discover(Some(&id("auth"))),
            vec![id("auth.login"), id("auth.logout")]
        );
    }

    #[test]
    fn re_registering_replaces() {
        let mut reg = registry();
        reg.register(TestDefinition::new(id("cart.add")).with_description("v2"));
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.load(&id("cart.add")).unwrap().description, "v2");
    }

    #[test]
    fn external_data_lookup() {
        let mut reg = registry();
        reg.register_data(id("auth.login"), "/tmp/auth/login.csv");
        assert_eq!(
            reg.external_data(&id("auth.login")),
            Some(PathBuf::from("/tmp/auth/login.csv"))
        );
        assert!(reg.external_data(&id("cart.add")).is_none());
    }
}
