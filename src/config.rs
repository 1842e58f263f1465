//! Process configuration from `COMPONENT_CI_*` environment variables.
//!
//! | Variable                              | Default                     |
//! |---------------------------------------|-----------------------------|
//! | `COMPONENT_CI_LISTEN_ADDR`            | `0.0.0.0:3000`              |
//! | `COMPONENT_CI_DATA_DIR`               | `data`                      |
//! | `COMPONENT_CI_WORK_DIR`               | `<tmp>/component-ci`        |
//! | `COMPONENT_CI_WEBHOOK_SECRET`         | required                    |
//! | `COMPONENT_CI_SSH_KEY`                | unset (SSH agent)           |
//! | `COMPONENT_CI_PUSH_BASE_URL`          | `git@github.com:`           |
//! | `COMPONENT_CI_READ_BASE_URL`          | `https://github.com/`       |
//! | `COMPONENT_CI_COMMIT_NAME`            | `component-ci`              |
//! | `COMPONENT_CI_COMMIT_EMAIL`           | `ci@localhost`              |
//! | `COMPONENT_CI_BUILD_EXCLUSIONS`       | empty                       |
//! | `COMPONENT_CI_TEST_EXCLUSIONS`        | empty                       |
//! | `COMPONENT_CI_PUBLISH_SCOPES`         | empty (nothing published)   |
//! | `COMPONENT_CI_SCOPE_TAG`              | `web-component`             |
//! | `COMPONENT_CI_TEST_COMMAND`           | `npx component-test-runner` |
//! | `COMPONENT_CI_MODEL_COMMAND`          | `npx api-model-generator`   |
//! | `COMPONENT_CI_PACKAGE_MANAGER`        | `npm`                       |
//! | `COMPONENT_CI_STALE_TREE_HOURS`       | `24`                        |
//!
//! List values are comma separated.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::executor::CommandSpec;
use crate::git::{CommitIdentity, GitConfig};
use crate::pipeline::PipelineConfig;
use crate::scheduler::SchedulerConfig;
use crate::types::ExclusionList;

const PREFIX: &str = "COMPONENT_CI_";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PUSH_BASE_URL: &str = "git@github.com:";
const DEFAULT_READ_BASE_URL: &str = "https://github.com/";
const DEFAULT_SCOPE_TAG: &str = "web-component";
const DEFAULT_TEST_COMMAND: &str = "npx component-test-runner";
const DEFAULT_MODEL_COMMAND: &str = "npx api-model-generator";
const DEFAULT_PACKAGE_MANAGER: &str = "npm";
const DEFAULT_STALE_TREE_HOURS: u64 = 24;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Directory holding the entity store.
    pub data_dir: PathBuf,
    /// Parent of the per-job working trees.
    pub work_dir: PathBuf,
    pub webhook_secret: String,
    pub git: GitConfig,
    pub build_exclusions: ExclusionList,
    pub test_exclusions: ExclusionList,
    pub publish_scopes: Vec<String>,
    pub scope_tag: String,
    pub test_command: CommandSpec,
    pub model_command: CommandSpec,
    pub package_manager: CommandSpec,
    /// Working trees older than this are removed at startup.
    pub stale_tree_age: Duration,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a full variable
    /// name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let listen_addr = env
            .get_or("LISTEN_ADDR", DEFAULT_LISTEN_ADDR)
            .parse::<SocketAddr>()
            .map_err(|e| env.invalid("LISTEN_ADDR", e))?;

        let webhook_secret = env.require("WEBHOOK_SECRET")?;
        if webhook_secret.is_empty() {
            return Err(env.invalid("WEBHOOK_SECRET", "must not be empty"));
        }

        let stale_hours = match env.get("STALE_TREE_HOURS") {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| env.invalid("STALE_TREE_HOURS", e))?,
            None => DEFAULT_STALE_TREE_HOURS,
        };

        Ok(Config {
            listen_addr,
            data_dir: PathBuf::from(env.get_or("DATA_DIR", "data")),
            work_dir: env
                .get("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("component-ci")),
            webhook_secret,
            git: GitConfig {
                push_base_url: env.get_or("PUSH_BASE_URL", DEFAULT_PUSH_BASE_URL),
                read_base_url: env.get_or("READ_BASE_URL", DEFAULT_READ_BASE_URL),
                ssh_key_path: env.get("SSH_KEY").map(PathBuf::from),
                identity: CommitIdentity {
                    name: env.get_or("COMMIT_NAME", "component-ci"),
                    email: env.get_or("COMMIT_EMAIL", "ci@localhost"),
                },
            },
            build_exclusions: ExclusionList::parse(&env.get_or("BUILD_EXCLUSIONS", "")),
            test_exclusions: ExclusionList::parse(&env.get_or("TEST_EXCLUSIONS", "")),
            publish_scopes: split_list(&env.get_or("PUBLISH_SCOPES", "")),
            scope_tag: env.get_or("SCOPE_TAG", DEFAULT_SCOPE_TAG),
            test_command: env.command("TEST_COMMAND", DEFAULT_TEST_COMMAND)?,
            model_command: env.command("MODEL_COMMAND", DEFAULT_MODEL_COMMAND)?,
            package_manager: env.command("PACKAGE_MANAGER", DEFAULT_PACKAGE_MANAGER)?,
            stale_tree_age: Duration::from_secs(stale_hours * 3600),
        })
    }

    /// Directory of the file-backed entity store.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            work_root: self.work_dir.join("builds"),
            git: self.git.clone(),
            excluded: self.build_exclusions.clone(),
            publish_scopes: self.publish_scopes.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            work_root: self.work_dir.join("tests"),
            git: self.git.clone(),
            excluded: self.test_exclusions.clone(),
            scope_tag: self.scope_tag.clone(),
        }
    }

    /// Same as the test scheduler's, with its own working tree root.
    pub fn coverage_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            work_root: self.work_dir.join("coverage"),
            ..self.scheduler_config()
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn var(name: &str) -> String {
        format!("{PREFIX}{name}")
    }

    /// Unset and blank values read as absent.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::var(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, name: &str) -> Result<String> {
        self.get(name).ok_or_else(|| ConfigError::Missing(Self::var(name)))
    }

    fn command(&self, name: &str, default: &str) -> Result<CommandSpec> {
        let line = self.get_or(name, default);
        CommandSpec::parse(&line).ok_or_else(|| self.invalid(name, "empty command"))
    }

    fn invalid(&self, name: &str, reason: impl ToString) -> ConfigError {
        ConfigError::Invalid {
            var: Self::var(name),
            value: (self.lookup)(&Self::var(name)).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
