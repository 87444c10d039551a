use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Boundary to the build-staging sync engine.
///
/// Build-kind tasks stage their module sources into a build directory before
/// processing; the directory synchronization itself (include/exclude rules,
/// symlink policy) lives outside this workspace. The solver never calls this
/// trait — it is I/O a build task performs inside its own `process`.
#[async_trait]
pub trait BuildStaging: Send + Sync {
    /// Synchronizes a module's sources from `src` into `build_path`.
    async fn sync_from_src(
        &self,
        module: &str,
        src: &Path,
        build_path: &Path,
    ) -> eyre::Result<()>;

    /// Returns the staging directory for a module, creating it if needed.
    async fn ensure_build_path(&self, module: &str) -> eyre::Result<PathBuf>;
}
