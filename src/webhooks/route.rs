//! Maps webhook events to the build they trigger.

use crate::pipeline::{MASTER_BRANCH, STAGE_BRANCH};
use crate::types::{BuildJob, BuildKind};

use super::events::{GitHubEvent, PushEvent, PushTarget, StatusEvent, StatusState};

/// Commit message marker requesting a patch version bump on stage builds.
pub const BUMP_VERSION_MARKER: &str = "[bump-version]";

/// Returns the build an event should start, or `None` when it starts nothing.
pub fn build_for_event(event: &GitHubEvent) -> Option<BuildJob> {
    match event {
        GitHubEvent::Ping => None,
        GitHubEvent::Status(e) => build_for_status(e),
        GitHubEvent::Push(e) => build_for_push(e),
    }
}

/// A green status on the tip of `stage` starts a stage build.
fn build_for_status(event: &StatusEvent) -> Option<BuildJob> {
    if event.state != StatusState::Success || !event.branches.iter().any(|b| b == STAGE_BRANCH) {
        return None;
    }
    let repo = &event.repository;
    Some(
        BuildJob::new(
            BuildKind::Stage,
            &repo.component.name,
            &repo.component.organization,
            STAGE_BRANCH,
            &repo.clone_url,
        )
        .with_commit(event.sha.as_str())
        .with_bump_version(event.commit_message.contains(BUMP_VERSION_MARKER)),
    )
}

fn build_for_push(event: &PushEvent) -> Option<BuildJob> {
    if event.deleted {
        return None;
    }
    let repo = &event.repository;
    let component = &repo.component;
    match &event.target {
        PushTarget::Branch(branch) if branch == MASTER_BRANCH => {
            let job = BuildJob::new(
                BuildKind::Master,
                &component.name,
                &component.organization,
                MASTER_BRANCH,
                &repo.clone_url,
            );
            Some(match &event.after {
                Some(sha) => job.with_commit(sha.as_str()),
                None => job,
            })
        }
        PushTarget::Branch(_) => None,
        PushTarget::Tag(tag) => {
            let job = BuildJob::new(
                BuildKind::Tag,
                &component.name,
                &component.organization,
                tag,
                &repo.clone_url,
            )
            .with_release_version(tag);
            Some(match &event.after {
                Some(sha) => job.with_commit(sha.as_str()),
                None => job,
            })
        }
    }
}
