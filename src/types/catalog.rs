//! Catalog and dependency-graph records written by tag builds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One component's declared dependency edges, keyed by its scoped package name.
///
/// Only the reverse direction ("who depends on X") is ever queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    /// Scoped package name of the component declaring the dependencies.
    pub component: String,
    /// Scoped names from `dependencies`.
    pub production: Vec<String>,
    /// Scoped names from `devDependencies`.
    pub development: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    /// Scoped package name.
    pub name: String,
    pub organization: String,
    /// Repository name.
    pub component: String,
    pub description: Option<String>,
    /// Catalog tags (package keywords). The full-catalog test scope is
    /// selected by tag.
    pub tags: Vec<String>,
    pub latest_version: String,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry for one released version of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Scoped package name.
    pub component: String,
    pub version: String,
    pub prerelease: bool,
    /// Whether the package was published to the registry.
    pub published: bool,
    /// Why publishing failed, when it was attempted and failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
