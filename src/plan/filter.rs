use tracing::debug;

use crate::error::ConfigError;
use crate::plan::test_id::TestId;
use crate::runner::definition::TestLoader;

/// A predicate over the tags a test declares.
#[derive(Debug, Clone, PartialEq)]
pub enum TagPredicate {
    Include(String),
    Exclude(String),
    And(Vec<TagPredicate>),
    Or(Vec<TagPredicate>),
}

impl TagPredicate {
    pub fn matches(&self, tags: &[String]) -> bool {
        match self {
            Self::Include(tag) => tags.iter().any(|t| t == tag),
            Self::Exclude(tag) => !tags.iter().any(|t| t == tag),
            Self::And(preds) => preds.iter().all(|p| p.matches(tags)),
            Self::Or(preds) => preds.iter().any(|p| p.matches(tags)),
        }
    }
}

/// Parse a filter string into a `TagPredicate`.
///
/// Supports:
/// - Single tag: `"smoke"` → `Include("smoke")`
/// - Comma-separated (OR): `"smoke,critical"` → `Or([Include("smoke"), Include("critical")])`
/// - NOT prefix: `"NOT slow"` → `Exclude("slow")`
/// - AND NOT: `"smoke AND NOT slow"` → `And([Include("smoke"), Exclude("slow")])`
///
/// # Errors
///
/// Returns [`ConfigError::InvalidTagFilter`] if the filter is empty or malformed.
pub fn parse_filter(input: &str) -> Result<TagPredicate, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::InvalidTagFilter("empty filter string".to_owned()));
    }

    if input.contains(" AND ") {
        let preds: Result<Vec<TagPredicate>, ConfigError> =
            input.split(" AND ").map(|p| parse_single(p.trim())).collect();
        return Ok(TagPredicate::And(preds?));
    }

    if input.contains(',') {
        let preds: Result<Vec<TagPredicate>, ConfigError> =
            input.split(',').map(|p| parse_single(p.trim())).collect();
        return Ok(TagPredicate::Or(preds?));
    }

    parse_single(input)
}

/// Combine several filter expressions; a test must satisfy all of them.
/// Returns `None` when there is nothing to filter on.
pub fn parse_filters(inputs: &[String]) -> Result<Option<TagPredicate>, ConfigError> {
    let mut preds = inputs
        .iter()
        .map(|i| parse_filter(i))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match preds.len() {
        0 => None,
        1 => preds.pop(),
        _ => Some(TagPredicate::And(preds)),
    })
}

fn parse_single(input: &str) -> Result<TagPredicate, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::InvalidTagFilter("empty tag in filter".to_owned()));
    }

    if let Some(tag) = input.strip_prefix("NOT ") {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ConfigError::InvalidTagFilter("empty tag after NOT".to_owned()));
        }
        Ok(TagPredicate::Exclude(tag.to_owned()))
    } else {
        Ok(TagPredicate::Include(input.to_owned()))
    }
}

/// Keep the tests whose declared tags match, preserving order. A test that
/// fails to load has no tags.
pub fn filter_tests(
    loader: &dyn TestLoader,
    tests: Vec<TestId>,
    predicate: &TagPredicate,
) -> Vec<TestId> {
    tests
        .into_iter()
        .filter(|test| {
            let tags = loader.load(test).map(|def| def.tags).unwrap_or_default();
            let keep = predicate.matches(&tags);
            if !keep {
                debug!(test = %test, "excluded by tag filter");
            }
            keep
        })
        .collect()
}
