//! Package manifest (`package.json`) and lock file handling.

use std::fmt;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::persistence::write_all_atomic;

pub const MANIFEST: &str = "package.json";
pub const LOCK_FILE: &str = "package-lock.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON in {file}: {source}")]
    Json {
        file: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} has no version")]
    MissingVersion(&'static str),

    #[error("invalid version: {0}")]
    InvalidVersion(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// A semantic version (`major.minor.patch[-prerelease][+build]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Version> {
        let invalid = || ManifestError::InvalidVersion(input.to_string());
        let trimmed = input.trim();
        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) if !build.is_empty() => (rest, Some(build.to_string())),
            Some(_) => return Err(invalid()),
            None => (trimmed, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => {
                let ids: Vec<String> = pre.split('.').map(str::to_string).collect();
                if ids.iter().any(|id| id.is_empty()) {
                    return Err(invalid());
                }
                (core, ids)
            }
            None => (rest, Vec::new()),
        };

        let mut parts = core.split('.');
        let mut number = || -> Result<u64> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let major = number()?;
        let minor = number()?;
        let patch = number()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Version {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// The next patch release.
    ///
    /// A prerelease graduates to its own release version (`1.3.0-beta.2`
    /// becomes `1.3.0`). Build metadata is dropped.
    pub fn bump_patch(&self) -> Version {
        let patch = if self.is_prerelease() {
            self.patch
        } else {
            self.patch + 1
        };
        Version {
            major: self.major,
            minor: self.minor,
            patch,
            prerelease: Vec::new(),
            build: None,
        }
    }

    /// Registry distribution tag for publishing this version.
    ///
    /// Releases go to `latest`. A prerelease goes to its first identifier
    /// (`2.0.0-beta.1` → `beta`), or `next` when that identifier is numeric.
    pub fn dist_tag(&self) -> &str {
        match self.prerelease.first() {
            None => "latest",
            Some(id) if id.bytes().all(|b| b.is_ascii_digit()) => "next",
            Some(id) => id.as_str(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.is_prerelease() {
            write!(f, "-{}", self.prerelease.join("."))?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

fn read_json(path: &Path, file: &'static str) -> Result<Value> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| ManifestError::Json { file, source })
}

fn to_pretty(value: &Value, file: &'static str) -> Result<Vec<u8>> {
    let mut out =
        serde_json::to_vec_pretty(value).map_err(|source| ManifestError::Json { file, source })?;
    out.push(b'\n');
    Ok(out)
}

/// Reads `package.json` in `dir`.
pub fn read_manifest(dir: &Path) -> Result<Value> {
    read_json(&dir.join(MANIFEST), MANIFEST)
}

/// Version declared by a parsed manifest.
pub fn manifest_version(manifest: &Value) -> Result<Version> {
    let version = manifest
        .get("version")
        .and_then(Value::as_str)
        .ok_or(ManifestError::MissingVersion(MANIFEST))?;
    Version::parse(version)
}

pub fn read_version(dir: &Path) -> Result<Version> {
    manifest_version(&read_manifest(dir)?)
}

/// Increments the patch version in `package.json` and, if present,
/// `package-lock.json`. Both files are replaced together.
///
/// Returns the previous and the new version.
pub fn bump_patch_version(dir: &Path) -> Result<(Version, Version)> {
    let manifest_path = dir.join(MANIFEST);
    let lock_path = dir.join(LOCK_FILE);

    let mut manifest = read_json(&manifest_path, MANIFEST)?;
    let previous = manifest_version(&manifest)?;
    let next = previous.bump_patch();
    let next_str = Value::String(next.to_string());
    manifest["version"] = next_str.clone();
    let manifest_bytes = to_pretty(&manifest, MANIFEST)?;

    let lock_bytes = if lock_path.is_file() {
        let mut lock = read_json(&lock_path, LOCK_FILE)?;
        if let Some(obj) = lock.as_object_mut() {
            obj.insert("version".to_string(), next_str.clone());
        }
        if let Some(root) = lock.pointer_mut("/packages/").and_then(Value::as_object_mut) {
            root.insert("version".to_string(), next_str);
        }
        Some(to_pretty(&lock, LOCK_FILE)?)
    } else {
        None
    };

    let mut files: Vec<(&Path, &[u8])> =
        vec![(manifest_path.as_path(), manifest_bytes.as_slice())];
    if let Some(ref bytes) = lock_bytes {
        files.push((lock_path.as_path(), bytes.as_slice()));
    }
    write_all_atomic(&files)?;

    Ok((previous, next))
}

/// Scoped (`@org/name`) package names declared under `section`.
pub fn scoped_dependencies(manifest: &Value, section: &str) -> Vec<String> {
    let mut names: Vec<String> = manifest
        .get(section)
        .and_then(Value::as_object)
        .map(|deps| {
            deps.keys()
                .filter(|name| name.starts_with('@') && name.contains('/'))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn parse_and_display() {
        let v = Version::parse("2.0.0-beta.1+sha.abc").unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.prerelease, vec!["beta", "1"]);
        assert_eq!(v.build.as_deref(), Some("sha.abc"));
        assert_eq!(v.to_string(), "2.0.0-beta.1+sha.abc");
    }

    #[test]
    fn parse_rejects_malformed() {
        let malformed = [
            "", "1", "1.2", "1.2.3.4", "v1.2.3", "1.2.x", "1.2.3-", "1.2.3-a..b", "1.2.3+",
        ];
        for bad in malformed {
            assert!(Version::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn bump_and_dist_tags() {
        assert_eq!(Version::parse("1.2.3").unwrap().bump_patch().to_string(), "1.2.4");
        assert_eq!(
            Version::parse("1.3.0-beta.2").unwrap().bump_patch().to_string(),
            "1.3.0"
        );
        assert_eq!(Version::parse("1.2.3").unwrap().dist_tag(), "latest");
        assert_eq!(Version::parse("2.0.0-beta.1").unwrap().dist_tag(), "beta");
        assert_eq!(Version::parse("2.0.0-0.3").unwrap().dist_tag(), "next");
    }

    #[test]
    fn bump_rewrites_manifest_and_lock() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST),
            r#"{"name":"@o/x","version":"1.2.3","dependencies":{"lit":"^2.0.0"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(LOCK_FILE),
            r#"{"name":"@o/x","version":"1.2.3","lockfileVersion":2,"packages":{"":{"name":"@o/x","version":"1.2.3"},"node_modules/lit":{"version":"2.0.0"}}}"#,
        )
        .unwrap();

        let (old, new) = bump_patch_version(dir.path()).unwrap();
        assert_eq!(old.to_string(), "1.2.3");
        assert_eq!(new.to_string(), "1.2.4");

        let manifest = std::fs::read_to_string(dir.path().join(MANIFEST)).unwrap();
        assert!(manifest.ends_with("}\n"));
        assert!(manifest.starts_with("{\n  \"name\""), "key order and indent kept");
        assert_eq!(read_version(dir.path()).unwrap().to_string(), "1.2.4");

        let lock: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap())
                .unwrap();
        assert_eq!(lock["version"], "1.2.4");
        assert_eq!(lock["packages"][""]["version"], "1.2.4");
        assert_eq!(lock["packages"]["node_modules/lit"]["version"], "2.0.0");
    }

    #[test]
    fn bump_without_lock_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST), r#"{"version":"0.1.9"}"#).unwrap();
        let (_, new) = bump_patch_version(dir.path()).unwrap();
        assert_eq!(new.to_string(), "0.1.10");
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn missing_version_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST), r#"{"name":"x"}"#).unwrap();
        assert!(matches!(
            bump_patch_version(dir.path()),
            Err(ManifestError::MissingVersion(_))
        ));
    }

    #[test]
    fn scoped_dependencies_filters_unscoped() {
        let manifest: Value = serde_json::json!({
            "dependencies": {"lit": "^2", "@o/date-time": "^1", "@o/icons": "^3"},
            "devDependencies": {"@open-wc/testing": "^2"}
        });
        assert_eq!(
            scoped_dependencies(&manifest, "dependencies"),
            vec!["@o/date-time", "@o/icons"]
        );
        assert_eq!(
            scoped_dependencies(&manifest, "devDependencies"),
            vec!["@open-wc/testing"]
        );
        assert!(scoped_dependencies(&manifest, "peerDependencies").is_empty());
    }

    proptest! {
        #[test]
        fn bump_patch_is_monotonic(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
            let v = Version::parse(&format!("{major}.{minor}.{patch}")).unwrap();
            let next = v.bump_patch();
            prop_assert_eq!(next.major, major);
            prop_assert_eq!(next.minor, minor);
            prop_assert_eq!(next.patch, patch + 1);
            prop_assert_eq!(Version::parse(&next.to_string()).unwrap(), next);
        }
    }
}
