//! Fixed component exclusion lists.

use serde::{Deserialize, Serialize};

use super::ids::ComponentRef;

/// Components never processed by a job family.
///
/// Entries are either unscoped repository names (`api-console`), matching
/// that name in any organization, or scoped package names
/// (`@advanced-rest-client/api-console`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionList {
    entries: Vec<String>,
}

impl ExclusionList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExclusionList {
            entries: entries
                .into_iter()
                .map(Into::into)
                .map(|e: String| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Parses a comma-separated list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn contains(&self, component: &ComponentRef) -> bool {
        let package = component.package_name();
        self.entries
            .iter()
            .any(|e| e == &package || e == &component.name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_bare_and_scoped_names() {
        let list = ExclusionList::parse("api-console, @o/legacy ,,");
        assert!(list.contains(&ComponentRef::new("o", "api-console")));
        assert!(list.contains(&ComponentRef::new("other", "api-console")));
        assert!(list.contains(&ComponentRef::new("o", "legacy")));
        assert!(!list.contains(&ComponentRef::new("other", "legacy")));
        assert!(!list.contains(&ComponentRef::new("o", "date-time")));
    }

    #[test]
    fn empty_list_excludes_nothing() {
        let list = ExclusionList::parse("");
        assert!(list.is_empty());
        assert!(!list.contains(&ComponentRef::new("o", "x")));
    }
}
