//! CHANGELOG.md generation from commit history.

use std::path::Path;

use chrono::NaiveDate;

use crate::git::{CommitSummary, GitResult, Repository};
use crate::persistence::write_atomic;

pub const CHANGELOG: &str = "CHANGELOG.md";

const HEADING: &str = "# Changelog";

/// Markers of automated commits that never appear in the changelog.
const SKIP_MARKERS: [&str; 2] = ["[ci skip]", "[skip ci]"];

fn is_automated(commit: &CommitSummary) -> bool {
    SKIP_MARKERS.iter().any(|m| commit.subject.contains(m))
}

/// Renders one release section, newest commit first.
pub fn render_section(version: &str, date: NaiveDate, commits: &[&CommitSummary]) -> String {
    let mut section = format!("## {} ({})\n\n", version, date.format("%Y-%m-%d"));
    for commit in commits {
        let short = commit.sha.get(..7).unwrap_or(&commit.sha);
        section.push_str(&format!("- {} ({})\n", commit.subject, short));
    }
    section
}

/// Inserts `section` below the changelog heading, creating the heading if
/// the existing text does not start with it.
pub fn prepend_section(existing: &str, section: &str) -> String {
    let body = existing
        .strip_prefix(HEADING)
        .map(|rest| rest.trim_start_matches(['\r', '\n']))
        .unwrap_or(existing);
    if body.trim().is_empty() {
        format!("{}\n\n{}", HEADING, section)
    } else {
        format!("{}\n\n{}\n{}", HEADING, section, body)
    }
}

/// Adds a section for `version` listing the commits since the last release
/// tag, skipping automated commits.
///
/// Returns false, leaving the file untouched, when there is nothing to add.
pub async fn update_changelog(repo: &Repository, version: &str, date: NaiveDate) -> GitResult<bool> {
    let since = repo.latest_tag().await?;
    let commits = repo.log_since(since.as_deref()).await?;
    let entries: Vec<&CommitSummary> = commits.iter().filter(|c| !is_automated(c)).collect();
    if entries.is_empty() {
        return Ok(false);
    }

    let path = repo.path().join(CHANGELOG);
    let existing = read_existing(&path)?;
    let updated = prepend_section(&existing, &render_section(version, date, &entries));
    write_atomic(&path, updated.as_bytes())?;
    Ok(true)
}

fn read_existing(path: &Path) -> std::io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestRemote, test_git_config};
    use crate::git::Transport;
    use tempfile::tempdir;

    fn commit(sha: &str, subject: &str) -> CommitSummary {
        CommitSummary {
            sha: sha.to_string(),
            subject: subject.to_string(),
            author: "dev".to_string(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn section_lists_subjects_with_short_sha() {
        let a = commit("0123456789abcdef", "Fix date parsing");
        let b = commit("abc", "Add locale");
        let section = render_section("1.2.4", date(), &[&a, &b]);
        assert_eq!(
            section,
            "## 1.2.4 (2024-03-01)\n\n- Fix date parsing (0123456)\n- Add locale (abc)\n"
        );
    }

    #[test]
    fn prepend_keeps_previous_sections() {
        let first = prepend_section("", "## 1.0.0 (2024-01-01)\n\n- Initial\n");
        assert_eq!(first, "# Changelog\n\n## 1.0.0 (2024-01-01)\n\n- Initial\n");

        let second = prepend_section(&first, "## 1.0.1 (2024-02-01)\n\n- Fix\n");
        assert_eq!(
            second,
            "# Changelog\n\n## 1.0.1 (2024-02-01)\n\n- Fix\n\n## 1.0.0 (2024-01-01)\n\n- Initial\n"
        );
    }

    #[test]
    fn prepend_adds_heading_to_foreign_file() {
        let out = prepend_section("Old notes\n", "## 2.0.0 (2024-01-01)\n\n- X\n");
        assert!(out.starts_with("# Changelog\n\n## 2.0.0"));
        assert!(out.ends_with("Old notes\n"));
    }

    #[tokio::test]
    async fn lists_commits_since_last_tag_only() {
        let remote = TestRemote::new("o", "date-time", "1.0.0");
        remote.commit_file("stage", "a.js", "a", "Before release");
        remote.tag("stage", "1.0.0");
        remote.commit_file("stage", "b.js", "b", "Add locale support");
        remote.commit_file("stage", "c.js", "c", "[ci skip] Automated commit");

        let config = test_git_config(remote.base_url());
        let dir = tempdir().unwrap();
        let repo = Repository::clone(
            &config,
            &remote.url(),
            Transport::Authenticated,
            Some("stage"),
            None,
            &dir.path().join("clone"),
        )
        .await
        .unwrap();

        assert!(update_changelog(&repo, "1.0.1", date()).await.unwrap());
        let text = std::fs::read_to_string(repo.path().join(CHANGELOG)).unwrap();
        assert!(text.contains("## 1.0.1 (2024-03-01)"));
        assert!(text.contains("Add locale support"));
        assert!(!text.contains("Before release"));
        assert!(!text.contains("[ci skip]"));
    }

    #[tokio::test]
    async fn nothing_to_add_leaves_file_alone() {
        let remote = TestRemote::new("o", "date-time", "1.0.0");
        remote.tag("stage", "1.0.0");

        let config = test_git_config(remote.base_url());
        let dir = tempdir().unwrap();
        let repo = Repository::clone(
            &config,
            &remote.url(),
            Transport::Authenticated,
            Some("stage"),
            None,
            &dir.path().join("clone"),
        )
        .await
        .unwrap();

        assert!(!update_changelog(&repo, "1.0.1", date()).await.unwrap());
        assert!(!repo.path().join(CHANGELOG).exists());
    }
}
