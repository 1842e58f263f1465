//! Shared test utilities: proptest generators, a local git remote, and fakes
//! for the external tools the pipeline and scheduler drive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use proptest::prelude::*;
use tempfile::TempDir;

use crate::executor::{
    ExecutorError, ModelGenerator, PackageManager, ResultAccumulator, TestExecutor, TestOptions,
};
use crate::git::{CommitIdentity, GitConfig};
use crate::pubsub::{self, Notification, Publisher};
use crate::types::{CoverageSummary, ExecutionLog, JobStatus};

pub fn arb_status() -> impl Strategy<Value = JobStatus> {
    prop_oneof![
        Just(JobStatus::Queued),
        Just(JobStatus::Running),
        Just(JobStatus::Finished),
    ]
}

pub fn test_identity() -> CommitIdentity {
    CommitIdentity {
        name: "CI Test".to_string(),
        email: "ci@test.invalid".to_string(),
    }
}

/// Git settings pointing both transports at a local directory of bare repos.
pub fn test_git_config(base_url: String) -> GitConfig {
    GitConfig {
        push_base_url: base_url.clone(),
        read_base_url: base_url,
        ssh_key_path: None,
        identity: test_identity(),
    }
}

/// Runs git synchronously with a clean environment. Panics on failure.
pub fn git_sync(workdir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(workdir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .args(["-c", "user.name=Seed", "-c", "user.email=seed@test.invalid"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn package_json(package: &str, version: &str) -> String {
    format!(
        "{{\n  \"name\": \"{}\",\n  \"version\": \"{}\",\n  \"description\": \"Test component\",\n  \"keywords\": [\"web-components\"],\n  \"dependencies\": {{}},\n  \"devDependencies\": {{}}\n}}\n",
        package, version
    )
}

pub fn package_lock_json(package: &str, version: &str) -> String {
    format!(
        "{{\n  \"name\": \"{0}\",\n  \"version\": \"{1}\",\n  \"lockfileVersion\": 3,\n  \"requires\": true,\n  \"packages\": {{\n    \"\": {{\n      \"name\": \"{0}\",\n      \"version\": \"{1}\"\n    }}\n  }}\n}}\n",
        package, version
    )
}

/// A bare repository at `<base>/<org>/<name>.git` with `master` and `stage`
/// branches holding a package manifest, plus a seed clone used to push
/// further commits from tests.
pub struct TestRemote {
    dir: TempDir,
    organization: String,
    name: String,
}

impl TestRemote {
    pub fn new(organization: &str, name: &str, version: &str) -> TestRemote {
        let dir = TempDir::new().unwrap();
        let remote = TestRemote {
            dir,
            organization: organization.to_string(),
            name: name.to_string(),
        };
        remote.add_repo(organization, name, version);
        std::fs::create_dir_all(remote.scratch()).unwrap();
        remote
    }

    /// Adds another component repository under the same base URL.
    pub fn add_repo(&self, organization: &str, name: &str, version: &str) {
        let bare = self.repo_path(organization, name);
        std::fs::create_dir_all(&bare).unwrap();
        git_sync(&bare, &["init", "--quiet", "--bare", "-b", "master"]);

        let seed = self.seed_path(organization, name);
        std::fs::create_dir_all(&seed).unwrap();
        git_sync(&seed, &["init", "--quiet", "-b", "master"]);
        let package = format!("@{}/{}", organization, name);
        std::fs::write(seed.join("package.json"), package_json(&package, version)).unwrap();
        std::fs::write(
            seed.join("package-lock.json"),
            package_lock_json(&package, version),
        )
        .unwrap();
        std::fs::write(seed.join("README.md"), format!("# {}\n", name)).unwrap();
        git_sync(&seed, &["add", "."]);
        git_sync(&seed, &["commit", "--quiet", "-m", "Initial commit"]);
        git_sync(&seed, &["remote", "add", "origin", bare.to_str().unwrap()]);
        git_sync(&seed, &["push", "--quiet", "origin", "master"]);
        git_sync(&seed, &["push", "--quiet", "origin", "master:stage"]);
    }

    /// Base URL to use for both transports.
    pub fn base_url(&self) -> String {
        self.dir.path().join("remotes").to_string_lossy().to_string()
    }

    /// Clone URL of the primary repository.
    pub fn url(&self) -> String {
        self.repo_path(&self.organization, &self.name)
            .to_string_lossy()
            .to_string()
    }

    /// A writable directory that lives as long as the remote.
    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    fn repo_path(&self, organization: &str, name: &str) -> PathBuf {
        self.dir
            .path()
            .join("remotes")
            .join(organization)
            .join(format!("{}.git", name))
    }

    fn seed_path(&self, organization: &str, name: &str) -> PathBuf {
        self.dir
            .path()
            .join("seed")
            .join(format!("{}-{}", organization, name))
    }

    fn seed_checkout(&self, branch: &str) -> PathBuf {
        let seed = self.seed_path(&self.organization, &self.name);
        git_sync(&seed, &["fetch", "--quiet", "--tags", "origin"]);
        git_sync(
            &seed,
            &["checkout", "--quiet", "-B", branch, &format!("origin/{}", branch)],
        );
        seed
    }

    /// Commits `content` to `path` on `branch` and pushes it.
    pub fn commit_file(&self, branch: &str, path: &str, content: &str, message: &str) -> String {
        let seed = self.seed_checkout(branch);
        let file = seed.join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file, content).unwrap();
        git_sync(&seed, &["add", "--", path]);
        git_sync(&seed, &["commit", "--quiet", "-m", message]);
        git_sync(&seed, &["push", "--quiet", "origin", branch]);
        git_sync(&seed, &["rev-parse", "HEAD"])
    }

    /// Deletes `path` on `branch` and pushes the deletion.
    pub fn remove_file(&self, branch: &str, path: &str, message: &str) {
        let seed = self.seed_checkout(branch);
        git_sync(&seed, &["rm", "--quiet", "--", path]);
        git_sync(&seed, &["commit", "--quiet", "-m", message]);
        git_sync(&seed, &["push", "--quiet", "origin", branch]);
    }

    /// Creates and pushes a lightweight tag at the tip of `branch`.
    pub fn tag(&self, branch: &str, tag: &str) {
        let seed = self.seed_checkout(branch);
        git_sync(&seed, &["tag", tag]);
        git_sync(&seed, &["push", "--quiet", "origin", &format!("refs/tags/{}", tag)]);
    }

    pub fn branch_head(&self, branch: &str) -> String {
        git_sync(Path::new(&self.url()), &["rev-parse", branch])
    }

    /// Contents of `path` at the tip of `branch`.
    pub fn file_at(&self, branch: &str, path: &str) -> String {
        git_sync(
            Path::new(&self.url()),
            &["show", &format!("{}:{}", branch, path)],
        )
    }

    /// Subjects of the commits reachable from `branch`, newest first.
    pub fn subjects(&self, branch: &str) -> Vec<String> {
        git_sync(Path::new(&self.url()), &["log", "--format=%s", branch])
            .lines()
            .map(String::from)
            .collect()
    }

    /// Returns true if `ancestor` is reachable from `branch`.
    pub fn contains(&self, branch: &str, ancestor: &str) -> bool {
        Command::new("git")
            .current_dir(self.url())
            .args(["merge-base", "--is-ancestor", ancestor, branch])
            .status()
            .unwrap()
            .success()
    }

    pub fn tags(&self) -> Vec<String> {
        git_sync(Path::new(&self.url()), &["tag", "--list"])
            .lines()
            .map(String::from)
            .collect()
    }
}

// ─── Fakes ───

/// A call made to [`FakePackageManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCall {
    Install(PathBuf),
    AddDependency(PathBuf, String),
    Publish(PathBuf, String),
}

/// Package manager that records calls and fails installs in chosen directories.
#[derive(Debug, Default)]
pub struct FakePackageManager {
    calls: Mutex<Vec<PackageCall>>,
    failing_installs: Mutex<Vec<String>>,
    publish_error: Mutex<Option<String>>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `install` fail in any directory whose name is `dir_name`.
    pub fn fail_install_in(&self, dir_name: &str) {
        self.failing_installs
            .lock()
            .unwrap()
            .push(dir_name.to_string());
    }

    /// Makes every `publish` fail with `message`.
    pub fn fail_publish(&self, message: &str) {
        *self.publish_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<PackageCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Dist-tags of every publish call, in order.
    pub fn published(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PackageCall::Publish(_, tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PackageCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PackageManager for FakePackageManager {
    async fn install(&self, dir: &Path) -> crate::executor::Result<()> {
        self.record(PackageCall::Install(dir.to_path_buf()));
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing_installs.lock().unwrap().contains(&name) {
            return Err(ExecutorError::Report(format!("install failed in {}", name)));
        }
        Ok(())
    }

    async fn add_dependency(&self, dir: &Path, spec: &str) -> crate::executor::Result<()> {
        self.record(PackageCall::AddDependency(
            dir.to_path_buf(),
            spec.to_string(),
        ));
        Ok(())
    }

    async fn publish(&self, dir: &Path, dist_tag: &str) -> crate::executor::Result<()> {
        self.record(PackageCall::Publish(dir.to_path_buf(), dist_tag.to_string()));
        match self.publish_error.lock().unwrap().clone() {
            Some(stderr) => Err(ExecutorError::Failed {
                command: format!("npm publish --tag {}", dist_tag),
                status: "exit status: 1".to_string(),
                stderr,
            }),
            None => Ok(()),
        }
    }
}

/// Scripted outcome for one component in [`FakeTestExecutor`].
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// One `chromium` instance with the given passed/failed counts.
    Results { passed: u32, failed: u32 },
    /// The executor fails without a report.
    Crash(String),
}

/// Test executor with per-component scripted outcomes, keyed by package name.
///
/// Components without a script pass with three tests.
#[derive(Debug, Default)]
pub struct FakeTestExecutor {
    outcomes: Mutex<HashMap<String, FakeOutcome>>,
    coverage: Mutex<Option<CoverageSummary>>,
    runs: Mutex<Vec<TestOptions>>,
}

impl FakeTestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, component: &str, outcome: FakeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(component.to_string(), outcome);
    }

    pub fn set_coverage(&self, summary: CoverageSummary) {
        *self.coverage.lock().unwrap() = Some(summary);
    }

    /// Options of every invocation, in order.
    pub fn runs(&self) -> Vec<TestOptions> {
        self.runs.lock().unwrap().clone()
    }

    /// Package names tested, in order.
    pub fn tested(&self) -> Vec<String> {
        self.runs().into_iter().map(|o| o.component).collect()
    }
}

impl TestExecutor for FakeTestExecutor {
    async fn run_tests(
        &self,
        _dir: &Path,
        options: &TestOptions,
        results: &mut ResultAccumulator,
    ) -> crate::executor::Result<()> {
        self.runs.lock().unwrap().push(options.clone());
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&options.component)
            .cloned()
            .unwrap_or(FakeOutcome::Results {
                passed: 3,
                failed: 0,
            });
        match outcome {
            FakeOutcome::Results { passed, failed } => {
                results.record(ExecutionLog {
                    instance: "chromium".to_string(),
                    passed,
                    failed,
                    skipped: 0,
                    error: None,
                    entries: vec![],
                });
                Ok(())
            }
            FakeOutcome::Crash(message) => Err(ExecutorError::Report(message)),
        }
    }

    async fn run_coverage(
        &self,
        _dir: &Path,
        options: &TestOptions,
    ) -> crate::executor::Result<CoverageSummary> {
        self.runs.lock().unwrap().push(options.clone());
        let summary = *self.coverage.lock().unwrap();
        summary.ok_or_else(|| ExecutorError::Report("no coverage".to_string()))
    }
}

/// Model generator that records the directories it ran in.
#[derive(Debug, Default)]
pub struct FakeModelGenerator {
    dirs: Mutex<Vec<PathBuf>>,
}

impl FakeModelGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().unwrap().clone()
    }
}

impl ModelGenerator for FakeModelGenerator {
    async fn generate(&self, dir: &Path) -> crate::executor::Result<()> {
        self.dirs.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }
}

/// Publisher that records notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    async fn publish(&self, notification: &Notification) -> pubsub::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
