//! LXD custom executor scripts

use std::path::{Path, PathBuf};
use std::sync::Arc;

use runnerd_pkg::HostTools;
use tracing::{debug, info, instrument};

use crate::error::CoreError;

/// Permission bits for rendered scripts
pub const SCRIPT_MODE: u32 = 0o775;

/// One of the four scripts the custom executor calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorScript {
    Base,
    Prepare,
    Run,
    Cleanup,
}

impl ExecutorScript {
    /// All scripts, in render order
    pub const ALL: [ExecutorScript; 4] = [
        ExecutorScript::Base,
        ExecutorScript::Prepare,
        ExecutorScript::Run,
        ExecutorScript::Cleanup,
    ];

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            ExecutorScript::Base => "base.sh",
            ExecutorScript::Prepare => "prepare.sh",
            ExecutorScript::Run => "run.sh",
            ExecutorScript::Cleanup => "cleanup.sh",
        }
    }

    #[must_use]
    pub fn contents(self) -> &'static str {
        match self {
            ExecutorScript::Base => include_str!("../templates/base.sh"),
            ExecutorScript::Prepare => include_str!("../templates/prepare.sh"),
            ExecutorScript::Run => include_str!("../templates/run.sh"),
            ExecutorScript::Cleanup => include_str!("../templates/cleanup.sh"),
        }
    }
}

/// Writes executor scripts with fixed ownership and permissions
pub struct ScriptRenderer {
    host: Arc<HostTools>,
    owner: String,
    group: String,
}

impl ScriptRenderer {
    /// Scripts will be owned by `owner:group`
    pub fn new(host: Arc<HostTools>, owner: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            host,
            owner: owner.into(),
            group: group.into(),
        }
    }

    /// Render one script into `dir`
    ///
    /// # Errors
    /// Returns `CoreError::TemplateError` if the file cannot be written, or
    /// the ownership change fails
    pub async fn render(&self, script: ExecutorScript, dir: &Path) -> Result<PathBuf, CoreError> {
        let path = dir.join(script.file_name());
        let err = |e: runnerd_pkg::PackageError| {
            CoreError::TemplateError(format!("{}: {e}", path.display()))
        };

        self.host
            .write_file(&path, script.contents().as_bytes(), SCRIPT_MODE)
            .await
            .map_err(err)?;
        self.host
            .chown(&path, &self.owner, &self.group)
            .await
            .map_err(err)?;

        debug!(path = %path.display(), "rendered executor script");
        Ok(path)
    }

    /// Render every script into `dir`, creating it if needed
    ///
    /// # Errors
    /// Returns `CoreError::TemplateError` on the first failure
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub async fn render_all(&self, dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
        self.host
            .create_dir(dir)
            .await
            .map_err(|e| CoreError::TemplateError(format!("{}: {e}", dir.display())))?;

        let mut written = Vec::with_capacity(ExecutorScript::ALL.len());
        for script in ExecutorScript::ALL {
            written.push(self.render(script, dir).await?);
        }

        info!(count = written.len(), "executor scripts rendered");
        Ok(written)
    }
}
