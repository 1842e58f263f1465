//! Catalog metadata and dependency records derived from a released manifest.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{ComponentRecord, ComponentRef, DependencyRecord, VersionRecord};

use super::manifest::{Version, scoped_dependencies};

/// Catalog entries for `version` of `component`.
///
/// `previous` is the component's existing entry, if any. A prerelease does not
/// replace the latest version of a component that already has one.
pub fn catalog_entry(
    manifest: &Value,
    component: &ComponentRef,
    version: &Version,
    previous: Option<&ComponentRecord>,
    now: DateTime<Utc>,
) -> (ComponentRecord, VersionRecord) {
    let name = component.package_name();
    let description = manifest
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(String::from);
    let tags = manifest
        .get("keywords")
        .and_then(Value::as_array)
        .map(|keywords| {
            keywords
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let latest_version = match previous {
        Some(prev) if version.is_prerelease() => prev.latest_version.clone(),
        _ => version.to_string(),
    };

    let record = ComponentRecord {
        name: name.clone(),
        organization: component.organization.clone(),
        component: component.name.clone(),
        description,
        tags,
        latest_version,
        updated_at: now,
    };
    let version_record = VersionRecord {
        component: name,
        version: version.to_string(),
        prerelease: version.is_prerelease(),
        published: false,
        publish_error: None,
        created_at: now,
    };
    (record, version_record)
}

/// The scoped production and development dependencies of `component`.
pub fn dependency_record(
    manifest: &Value,
    component: &ComponentRef,
    now: DateTime<Utc>,
) -> DependencyRecord {
    DependencyRecord {
        component: component.package_name(),
        production: scoped_dependencies(manifest, "dependencies"),
        development: scoped_dependencies(manifest, "devDependencies"),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> Value {
        json!({
            "name": "@o/date-picker",
            "version": "1.4.0",
            "description": "A date picker",
            "keywords": ["web-components", "date"],
            "dependencies": {"@o/date-time": "^2.0.0", "lit": "^2.0.0"},
            "devDependencies": {"@o/testing-helpers": "^1.0.0"}
        })
    }

    #[test]
    fn entry_from_manifest() {
        let component = ComponentRef::new("o", "date-picker");
        let version = Version::parse("1.4.0").unwrap();
        let (record, version_record) =
            catalog_entry(&manifest(), &component, &version, None, Utc::now());

        assert_eq!(record.name, "@o/date-picker");
        assert_eq!(record.description.as_deref(), Some("A date picker"));
        assert_eq!(record.tags, vec!["web-components", "date"]);
        assert_eq!(record.latest_version, "1.4.0");
        assert!(!version_record.prerelease);
        assert!(!version_record.published);
    }

    #[test]
    fn prerelease_keeps_latest_version() {
        let component = ComponentRef::new("o", "date-picker");
        let release = Version::parse("1.4.0").unwrap();
        let (previous, _) = catalog_entry(&manifest(), &component, &release, None, Utc::now());

        let beta = Version::parse("2.0.0-beta.1").unwrap();
        let (record, version_record) =
            catalog_entry(&manifest(), &component, &beta, Some(&previous), Utc::now());
        assert_eq!(record.latest_version, "1.4.0");
        assert!(version_record.prerelease);

        let (first, _) = catalog_entry(&json!({}), &component, &beta, None, Utc::now());
        assert_eq!(first.latest_version, "2.0.0-beta.1");
        assert!(first.tags.is_empty());
        assert_eq!(first.description, None);
    }

    #[test]
    fn dependency_record_keeps_scoped_names() {
        let record = dependency_record(&manifest(), &ComponentRef::new("o", "date-picker"), Utc::now());
        assert_eq!(record.component, "@o/date-picker");
        assert_eq!(record.production, vec!["@o/date-time"]);
        assert_eq!(record.development, vec!["@o/testing-helpers"]);
    }
}
