//! External tools: test executor, API model generator, package manager.
//!
//! These are opaque subprocesses from this crate's point of view. Each is
//! behind a trait so the pipeline and the scheduler can be driven by fakes in
//! tests; the process-backed implementations take their command line from
//! configuration.
//!
//! # Module Structure
//!
//! - [`package`]: install, dependency injection and publish (`npm` by default)
//! - [`model`]: API model regeneration
//! - [`report`]: the executor's JSON-lines report and the per-run accumulator
//! - [`test`]: the test executor itself

pub mod model;
pub mod package;
pub mod report;

use std::fmt;
use std::path::Path;
use std::process::{Output, Stdio};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub use model::{APIS_MANIFEST, ModelGenerator, ProcessModelGenerator, apis_manifest};
pub use package::{Npm, PackageManager, branch_dependency_spec};
pub use report::{ExecutorEvent, ResultAccumulator};
pub use test::{ProcessTestExecutor, TestExecutor, TestOptions};

/// Maximum number of stderr bytes kept in error messages.
const STDERR_TAIL: usize = 4096;

/// Errors from external tools.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The program's report was missing or unusable.
    #[error("invalid report: {0}")]
    Report(String),

    /// IO error while talking to the program.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error encoding options or decoding output.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for external tool operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// A configured command line: program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Splits a command line on whitespace. Returns `None` if it is blank.
    pub fn parse(line: &str) -> Option<CommandSpec> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(CommandSpec {
            program,
            args: parts.collect(),
        })
    }

    pub(crate) fn command(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(cwd);
        cmd
    }

    fn describe(&self, extra: &[&str]) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.args.iter().map(String::as_str));
        parts.extend(extra);
        parts.join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(&[]))
    }
}

/// Runs `spec` with `extra` arguments in `cwd` and waits for it to exit.
///
/// `stdin` is written to the child and then closed. Output is captured; a
/// non-zero exit becomes [`ExecutorError::Failed`].
pub async fn run_command(
    spec: &CommandSpec,
    extra: &[&str],
    cwd: &Path,
    stdin: Option<&[u8]>,
) -> Result<Output> {
    debug!(command = %spec.describe(extra), cwd = %cwd.display(), "Running external tool");
    let mut cmd = spec.command(cwd);
    cmd.args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    if let Some(input) = stdin
        && let Some(mut writer) = child.stdin.take()
    {
        writer.write_all(input).await?;
    }

    let output = child.wait_with_output().await?;
    check_status(spec, extra, &output)?;
    Ok(output)
}

pub(crate) fn check_status(spec: &CommandSpec, extra: &[&str], output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(ExecutorError::Failed {
        command: spec.describe(extra),
        status: output.status.to_string(),
        stderr: stderr_tail(&output.stderr),
    })
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
