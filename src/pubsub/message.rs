//! Notification payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// What a subscriber should do with the job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "process-build")]
    ProcessBuild,
    #[serde(rename = "remove-build")]
    RemoveBuild,
    #[serde(rename = "runTest")]
    RunTest,
    #[serde(rename = "removeTest")]
    RemoveTest,
    #[serde(rename = "runCoverage")]
    RunCoverage,
    #[serde(rename = "removeCoverage")]
    RemoveCoverage,
}

impl Action {
    /// The job family topic this action is published on.
    pub fn topic(self) -> Topic {
        match self {
            Action::ProcessBuild | Action::RemoveBuild => Topic::Builds,
            Action::RunTest | Action::RemoveTest => Topic::Tests,
            Action::RunCoverage | Action::RemoveCoverage => Topic::Coverage,
        }
    }

    /// Returns true for actions that evict a job rather than run it.
    pub fn is_removal(self) -> bool {
        matches!(
            self,
            Action::RemoveBuild | Action::RemoveTest | Action::RemoveCoverage
        )
    }
}

/// One job family's notification topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Builds,
    Tests,
    Coverage,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Builds => "builds",
            Topic::Tests => "tests",
            Topic::Coverage => "coverage",
        };
        f.write_str(name)
    }
}

/// A `{action, id}` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub action: Action,
    pub id: JobId,
}

impl Notification {
    pub fn new(action: Action, id: JobId) -> Self {
        Notification { action, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_matches_action_names() {
        let cases = [
            (Action::ProcessBuild, "process-build"),
            (Action::RemoveBuild, "remove-build"),
            (Action::RunTest, "runTest"),
            (Action::RemoveTest, "removeTest"),
            (Action::RunCoverage, "runCoverage"),
            (Action::RemoveCoverage, "removeCoverage"),
        ];
        for (action, name) in cases {
            let value = serde_json::to_value(Notification::new(action, JobId::new("x"))).unwrap();
            assert_eq!(value, json!({"action": name, "id": "x"}));
        }
    }

    #[test]
    fn actions_route_to_family_topics() {
        assert_eq!(Action::RemoveBuild.topic(), Topic::Builds);
        assert_eq!(Action::RunTest.topic(), Topic::Tests);
        assert_eq!(Action::RemoveCoverage.topic(), Topic::Coverage);
        assert!(Action::RemoveTest.is_removal());
        assert!(!Action::RunCoverage.is_removal());
    }
}
