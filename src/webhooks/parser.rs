//! GitHub webhook payload parser.
//!
//! The event type comes from the `X-GitHub-Event` header. Unknown event types
//! parse to `Ok(None)` and are ignored; malformed payloads of known types are
//! errors. Unknown fields are always tolerated.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{ComponentRef, Sha};

use super::events::{GitHubEvent, PushEvent, PushTarget, Repository, StatusEvent, StatusState};

/// The all-zero SHA GitHub reports for a deleted ref.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<GitHubEvent>, ParseError> {
    match event_type {
        "ping" => Ok(Some(GitHubEvent::Ping)),
        "status" => parse_status(payload).map(|e| Some(GitHubEvent::Status(e))),
        "push" => parse_push(payload).map(|opt| opt.map(GitHubEvent::Push)),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawOwner,
    name: String,
    ssh_url: Option<String>,
    clone_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    // Push payloads carry the owner's `name`; everything else carries `login`.
    login: Option<String>,
    name: Option<String>,
}

impl RawRepository {
    fn into_repository(self) -> Result<Repository, ParseError> {
        let owner = self
            .owner
            .login
            .or(self.owner.name)
            .filter(|o| !o.is_empty())
            .ok_or(ParseError::InvalidField {
                field: "repository.owner",
                value: String::new(),
            })?;
        let clone_url = self.ssh_url.or(self.clone_url).unwrap_or_default();
        Ok(Repository {
            component: ComponentRef::new(owner, self.name),
            clone_url,
        })
    }
}

fn parse_sha(field: &'static str, value: &str) -> Result<Sha, ParseError> {
    Sha::parse(value).map_err(|_| ParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// ============================================================================
// status event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawStatusPayload {
    sha: String,
    state: String,
    #[serde(default)]
    branches: Vec<RawBranch>,
    commit: Option<RawStatusCommit>,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawStatusCommit {
    commit: RawCommitDetail,
}

#[derive(Debug, Deserialize)]
struct RawCommitDetail {
    message: String,
}

fn parse_status(payload: &[u8]) -> Result<StatusEvent, ParseError> {
    let raw: RawStatusPayload = serde_json::from_slice(payload)?;

    let state = match raw.state.as_str() {
        "pending" => StatusState::Pending,
        "success" => StatusState::Success,
        "failure" => StatusState::Failure,
        "error" => StatusState::Error,
        other => {
            return Err(ParseError::InvalidField {
                field: "state",
                value: other.to_string(),
            });
        }
    };

    Ok(StatusEvent {
        sha: parse_sha("sha", &raw.sha)?,
        state,
        branches: raw.branches.into_iter().map(|b| b.name).collect(),
        commit_message: raw.commit.map(|c| c.commit.message).unwrap_or_default(),
        repository: raw.repository.into_repository()?,
    })
}

// ============================================================================
// push event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    head_commit: Option<RawHeadCommit>,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawHeadCommit {
    message: String,
}

/// Pushes to refs outside `refs/heads/` and `refs/tags/` parse to `None`.
fn parse_push(payload: &[u8]) -> Result<Option<PushEvent>, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;
    let Some(target) = PushTarget::from_ref(&raw.git_ref) else {
        return Ok(None);
    };

    let deleted = raw.deleted || raw.after == NULL_SHA;
    let after = if deleted {
        None
    } else {
        Some(parse_sha("after", &raw.after)?)
    };

    Ok(Some(PushEvent {
        repository: raw.repository.into_repository()?,
        target,
        after,
        deleted,
        head_commit_message: raw.head_commit.map(|c| c.message),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "abcdef1234567890abcdef1234567890abcdef12";

    #[test]
    fn parse_status_success_on_stage() {
        let payload = format!(
            r#"{{
            "sha": "{SHA}",
            "state": "success",
            "context": "continuous-integration/travis-ci/push",
            "branches": [{{"name": "stage", "commit": {{"sha": "{SHA}"}}}}],
            "commit": {{"sha": "{SHA}", "commit": {{"message": "Fix parsing [bump-version]"}}}},
            "repository": {{
                "name": "date-time",
                "owner": {{"login": "o"}},
                "ssh_url": "git@github.com:o/date-time.git",
                "clone_url": "https://github.com/o/date-time.git"
            }}
        }}"#
        );

        let event = parse_webhook("status", payload.as_bytes()).unwrap().unwrap();
        match event {
            GitHubEvent::Status(e) => {
                assert_eq!(e.state, StatusState::Success);
                assert_eq!(e.sha.as_str(), SHA);
                assert_eq!(e.branches, vec!["stage"]);
                assert_eq!(e.commit_message, "Fix parsing [bump-version]");
                assert_eq!(e.repository.component, ComponentRef::new("o", "date-time"));
                assert_eq!(e.repository.clone_url, "git@github.com:o/date-time.git");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn parse_status_minimal() {
        let payload = format!(
            r#"{{"sha": "{SHA}", "state": "pending",
                "repository": {{"name": "x", "owner": {{"login": "o"}}}}}}"#
        );
        let event = parse_webhook("status", payload.as_bytes()).unwrap().unwrap();
        match event {
            GitHubEvent::Status(e) => {
                assert_eq!(e.state, StatusState::Pending);
                assert!(e.branches.is_empty());
                assert_eq!(e.commit_message, "");
                assert_eq!(e.repository.clone_url, "");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn parse_status_unknown_state_is_error() {
        let payload = format!(
            r#"{{"sha": "{SHA}", "state": "exploded",
                "repository": {{"name": "x", "owner": {{"login": "o"}}}}}}"#
        );
        assert!(matches!(
            parse_webhook("status", payload.as_bytes()),
            Err(ParseError::InvalidField { field: "state", .. })
        ));
    }

    #[test]
    fn parse_push_to_master() {
        let payload = format!(
            r#"{{
            "ref": "refs/heads/master",
            "before": "0000000000000000000000000000000000000001",
            "after": "{SHA}",
            "deleted": false,
            "head_commit": {{"id": "{SHA}", "message": "Merge branch 'stage' into master"}},
            "repository": {{"name": "date-time", "owner": {{"name": "o", "email": null}}}}
        }}"#
        );
        let event = parse_webhook("push", payload.as_bytes()).unwrap().unwrap();
        match event {
            GitHubEvent::Push(e) => {
                assert_eq!(e.target, PushTarget::Branch("master".to_string()));
                assert_eq!(e.after.unwrap().as_str(), SHA);
                assert!(!e.deleted);
                assert_eq!(e.repository.component.organization, "o");
            }
            other => panic!("expected Push, got {:?}", other),
        }
    }

    #[test]
    fn parse_deleted_tag_push() {
        let payload = format!(
            r#"{{"ref": "refs/tags/1.0.0", "after": "{NULL_SHA}", "deleted": true,
                "head_commit": null,
                "repository": {{"name": "x", "owner": {{"login": "o"}}}}}}"#
        );
        let event = parse_webhook("push", payload.as_bytes()).unwrap().unwrap();
        match event {
            GitHubEvent::Push(e) => {
                assert!(e.deleted);
                assert_eq!(e.after, None);
                assert_eq!(e.target, PushTarget::Tag("1.0.0".to_string()));
            }
            other => panic!("expected Push, got {:?}", other),
        }
    }

    #[test]
    fn parse_push_to_other_namespace_is_ignored() {
        let payload = format!(
            r#"{{"ref": "refs/notes/commits", "after": "{SHA}",
                "repository": {{"name": "x", "owner": {{"login": "o"}}}}}}"#
        );
        assert_eq!(parse_webhook("push", payload.as_bytes()).unwrap(), None);
    }

    #[test]
    fn ping_and_unknown_events() {
        assert_eq!(parse_webhook("ping", b"{}").unwrap(), Some(GitHubEvent::Ping));
        assert_eq!(parse_webhook("issues", b"not even json").unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_error() {
        assert!(matches!(
            parse_webhook("push", b"{\"ref\": 1}"),
            Err(ParseError::JsonError(_))
        ));
        assert!(matches!(
            parse_webhook("status", br#"{"sha": "nope", "state": "success", "repository": {"name": "x", "owner": {"login": "o"}}}"#),
            Err(ParseError::InvalidField { field: "sha", .. })
        ));
    }
}
