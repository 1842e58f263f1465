//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifiers (e.g., passing a
//! branch name where a job id is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key of a persisted job record (build, test run, or coverage run).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(s: impl Into<String>) -> Self {
        JobId(s.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        JobId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// A git commit SHA (40 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

/// Error returned when a string is not a valid 40-character hex SHA.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid SHA: {0:?}")]
pub struct InvalidSha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format. Use [`Sha::parse`] for untrusted input.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    /// Parses and validates a SHA (40 hex characters, normalised to lowercase).
    pub fn parse(s: impl AsRef<str>) -> Result<Self, InvalidSha> {
        let s = s.as_ref().trim();
        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Sha(s.to_ascii_lowercase()))
        } else {
            Err(InvalidSha(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A component in the ecosystem, identified by its GitHub organization and
/// repository (= unscoped package) name.
///
/// The npm package name is `@<organization>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentRef {
    pub organization: String,
    pub name: String,
}

impl ComponentRef {
    pub fn new(organization: impl Into<String>, name: impl Into<String>) -> Self {
        ComponentRef {
            organization: organization.into(),
            name: name.into(),
        }
    }

    /// Parses `@org/name` or `org/name`.
    ///
    /// Returns `None` when either part is missing or empty; such a component
    /// cannot be resolved to a clone URL.
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim().trim_start_matches('@');
        let (org, name) = trimmed.split_once('/')?;
        if org.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(ComponentRef::new(org, name))
    }

    /// The scoped npm package name (`@org/name`).
    pub fn package_name(&self) -> String {
        format!("@{}/{}", self.organization, self.name)
    }

    /// URL/key-safe identifier for this component.
    pub fn slug(&self) -> String {
        slugify(&format!("{}-{}", self.organization, self.name))
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}/{}", self.organization, self.name)
    }
}

/// Converts a name into a lowercase slug of alphanumerics separated by single dashes.
pub fn slugify(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
