use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Structured identifier of a test, suite or page: an ordered list of
/// path segments written as a dot path (`module.sub.test`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestId {
    segments: Vec<String>,
}

impl TestId {
    /// Build an identifier from segments. Empty segments are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidIdentifier`] when there are no segments
    /// or a segment is empty or contains a path separator.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let invalid = segments.is_empty()
            || segments
                .iter()
                .any(|s| s.is_empty() || s.contains(['/', '\\']) || s == "..");
        if invalid {
            return Err(ConfigError::InvalidIdentifier(segments.join(".")));
        }
        Ok(Self { segments })
    }

    /// Build an identifier from a path relative to a base directory,
    /// dropping the file extension of the last component.
    pub fn from_relative_path(relative: &Path) -> Result<Self, ConfigError> {
        let mut segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if let Some(last) = segments.last_mut()
            && let Some(stem) = Path::new(last.as_str()).file_stem()
        {
            *last = stem.to_string_lossy().into_owned();
        }
        Self::from_segments(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// First segment when the test is nested, empty for a top-level test.
    pub fn module(&self) -> &str {
        if self.segments.len() > 1 {
            &self.segments[0]
        } else {
            ""
        }
    }

    /// Segments between the module and the name.
    pub fn sub_modules(&self) -> &[String] {
        if self.segments.len() > 2 {
            &self.segments[1..self.segments.len() - 1]
        } else {
            &[]
        }
    }

    /// Whether `self` sits under `prefix` (or equals it).
    pub fn starts_with(&self, prefix: &TestId) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Location of this identifier under `base` with the given extension.
    pub fn to_path(&self, base: &Path, extension: &str) -> PathBuf {
        let mut path = base.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path.set_extension(extension);
        path
    }

    /// Location of this identifier as a directory under `base`.
    pub fn to_dir(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for TestId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segments(s.trim().split('.'))
    }
}

impl Serialize for TestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
