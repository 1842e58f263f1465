//! API model regeneration.
//!
//! Components that render API documentation ship a `demo/apis.json` listing
//! the API specs their demo and tests load. The generated models are not
//! committed, so they are rebuilt in the working tree before tests run.

use std::future::Future;
use std::path::{Path, PathBuf};

use super::{CommandSpec, Result, run_command};

/// Relative path of the API list that triggers model generation.
pub const APIS_MANIFEST: &str = "demo/apis.json";

pub trait ModelGenerator: Send + Sync + 'static {
    /// Regenerates API models in `dir`.
    fn generate(&self, dir: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Returns the API list path if the component in `dir` needs models.
pub fn apis_manifest(dir: &Path) -> Option<PathBuf> {
    let path = dir.join(APIS_MANIFEST);
    path.is_file().then_some(path)
}

/// Model generator run as a subprocess with the API list as its argument.
#[derive(Debug, Clone)]
pub struct ProcessModelGenerator {
    command: CommandSpec,
}

impl ProcessModelGenerator {
    pub fn new(command: CommandSpec) -> Self {
        ProcessModelGenerator { command }
    }
}

impl ModelGenerator for ProcessModelGenerator {
    async fn generate(&self, dir: &Path) -> Result<()> {
        run_command(&self.command, &[APIS_MANIFEST], dir, None).await?;
        Ok(())
    }
}
