//! Package manager operations.

use std::future::Future;
use std::path::Path;

use tracing::info;

use super::{CommandSpec, Result, run_command};

pub trait PackageManager: Send + Sync + 'static {
    /// Installs the dependencies declared in `dir`'s manifest.
    fn install(&self, dir: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Installs `spec` on top of the declared dependencies without saving it.
    ///
    /// Used to test dependents against an unreleased branch of a component.
    fn add_dependency(&self, dir: &Path, spec: &str) -> impl Future<Output = Result<()>> + Send;

    /// Publishes the package in `dir` under `dist_tag`.
    fn publish(&self, dir: &Path, dist_tag: &str) -> impl Future<Output = Result<()>> + Send;
}

/// `npm`-compatible package manager.
#[derive(Debug, Clone)]
pub struct Npm {
    command: CommandSpec,
}

impl Npm {
    pub fn new(command: CommandSpec) -> Self {
        Npm { command }
    }
}

impl PackageManager for Npm {
    async fn install(&self, dir: &Path) -> Result<()> {
        run_command(
            &self.command,
            &["install", "--no-audit", "--no-fund"],
            dir,
            None,
        )
        .await?;
        Ok(())
    }

    async fn add_dependency(&self, dir: &Path, spec: &str) -> Result<()> {
        run_command(
            &self.command,
            &["install", "--no-save", "--no-audit", "--no-fund", spec],
            dir,
            None,
        )
        .await?;
        Ok(())
    }

    async fn publish(&self, dir: &Path, dist_tag: &str) -> Result<()> {
        info!(dir = %dir.display(), dist_tag, "Publishing package");
        run_command(
            &self.command,
            &["publish", "--access", "public", "--tag", dist_tag],
            dir,
            None,
        )
        .await?;
        Ok(())
    }
}

/// Dependency spec installing `organization/name` from a git branch.
pub fn branch_dependency_spec(organization: &str, name: &str, branch: &str) -> String {
    format!("github:{}/{}#{}", organization, name, branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn branch_spec_format() {
        assert_eq!(
            branch_dependency_spec("advanced-rest-client", "date-time", "stage"),
            "github:advanced-rest-client/date-time#stage"
        );
    }

    #[tokio::test]
    async fn npm_subcommands_run_in_dir() {
        // `echo` stands in for npm: every subcommand exits 0.
        let dir = tempdir().unwrap();
        let npm = Npm::new(CommandSpec::parse("echo").unwrap());
        assert!(npm.publish(dir.path(), "latest").await.is_ok());
        assert!(npm.install(dir.path()).await.is_ok());
        assert!(npm.add_dependency(dir.path(), "github:o/x#stage").await.is_ok());
    }

    #[tokio::test]
    async fn failing_package_manager_is_an_error() {
        let dir = tempdir().unwrap();
        let npm = Npm::new(CommandSpec::parse("false").unwrap());
        assert!(npm.install(dir.path()).await.is_err());
    }
}
