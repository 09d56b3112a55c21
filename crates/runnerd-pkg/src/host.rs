//! Host-level helpers: users, groups, ownership, identity and file writes
//!
//! With `use_sudo`, files outside the agent's reach are read with `sudo cat`
//! and written by staging them under the temp dir and running `sudo install`.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runnerd_exec::{CommandExecutor, CommandLine};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::PackageError;

fn io_error(path: &Path, err: &std::io::Error) -> PackageError {
    PackageError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Create `path` readable only by its owner and write `contents`
async fn write_private(path: &Path, contents: &[u8], mode: u32) -> Result<(), PackageError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await
        .map_err(|e| io_error(path, &e))?;
    // an existing file keeps its old mode, so tighten before writing
    file.set_permissions(Permissions::from_mode(0o600))
        .await
        .map_err(|e| io_error(path, &e))?;
    file.write_all(contents)
        .await
        .map_err(|e| io_error(path, &e))?;
    file.sync_all().await.map_err(|e| io_error(path, &e))?;

    if mode != 0o600 {
        tokio::fs::set_permissions(path, Permissions::from_mode(mode))
            .await
            .map_err(|e| io_error(path, &e))?;
    }
    Ok(())
}

/// Sibling of `path` used for atomic replacement
fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.runnerd"))
}

/// Small host administration commands
pub struct HostTools {
    executor: Arc<dyn CommandExecutor>,
    use_sudo: bool,
}

impl HostTools {
    /// Create host tools running through `executor`
    pub fn new(executor: Arc<dyn CommandExecutor>, use_sudo: bool) -> Self {
        Self { executor, use_sudo }
    }

    /// Add `user` to the supplementary `group`
    ///
    /// # Errors
    /// Returns `PackageError::CommandFailed` if `gpasswd` exits non-zero
    #[instrument(skip(self))]
    pub async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), PackageError> {
        let cmd = CommandLine::new("gpasswd")
            .args(["-a", user, group])
            .with_sudo(self.use_sudo);
        self.executor.run_checked(&cmd).await?;

        info!(user, group, "added user to group");
        Ok(())
    }

    /// Set owner and group of `path`
    ///
    /// # Errors
    /// Returns `PackageError::CommandFailed` if `chown` exits non-zero
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn chown(&self, path: &Path, owner: &str, group: &str) -> Result<(), PackageError> {
        let cmd = CommandLine::new("chown")
            .arg(format!("{owner}:{group}"))
            .arg(path.display().to_string())
            .with_sudo(self.use_sudo);
        self.executor.run_checked(&cmd).await?;

        debug!(owner, group, "changed ownership");
        Ok(())
    }

    /// Create `dir` and its parents
    ///
    /// # Errors
    /// Returns `PackageError::Io` or `PackageError::CommandFailed`
    pub async fn create_dir(&self, dir: &Path) -> Result<(), PackageError> {
        if self.use_sudo {
            let cmd = CommandLine::new("install")
                .args(["-d".to_string(), dir.display().to_string()])
                .with_sudo(true);
            self.executor.run_checked(&cmd).await?;
            return Ok(());
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(dir, &e))
    }

    /// Read a file, `None` if it does not exist
    ///
    /// # Errors
    /// Returns `PackageError::Io` or `PackageError::CommandFailed` if the file
    /// exists but cannot be read
    pub async fn read_file(&self, path: &Path) -> Result<Option<String>, PackageError> {
        if self.use_sudo {
            let cmd = CommandLine::new("cat")
                .arg(path.display().to_string())
                .with_sudo(true);
            let result = self.executor.run(&cmd).await?;
            if result.success() {
                return Ok(Some(result.stdout));
            }
            if result.stderr.contains("No such file or directory") {
                return Ok(None);
            }
            return Err(PackageError::CommandFailed {
                status: result.status,
                message: result.stderr.trim().to_string(),
            });
        }

        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, &e)),
        }
    }

    /// Permission bits of an existing file
    ///
    /// # Errors
    /// Returns `PackageError::ParseError` if `stat` output is not octal
    pub async fn file_mode(&self, path: &Path) -> Result<u32, PackageError> {
        if self.use_sudo {
            let cmd = CommandLine::new("stat")
                .args(["-c".to_string(), "%a".to_string(), path.display().to_string()])
                .with_sudo(true);
            let result = self.executor.run_checked(&cmd).await?;
            let raw = result.stdout.trim();
            return u32::from_str_radix(raw, 8)
                .map_err(|e| PackageError::ParseError(format!("stat mode {raw:?}: {e}")));
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error(path, &e))?;
        Ok(metadata.permissions().mode() & 0o7777)
    }

    /// Replace `path` with `contents` and set `mode`
    ///
    /// The new content never appears under `path` half-written, and is never
    /// readable by others before `mode` is applied.
    ///
    /// # Errors
    /// Returns `PackageError::Io` or `PackageError::CommandFailed`
    #[instrument(skip(self, path, contents), fields(path = %path.display()))]
    pub async fn write_file(
        &self,
        path: &Path,
        contents: &[u8],
        mode: u32,
    ) -> Result<(), PackageError> {
        if self.use_sudo {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let staging =
                std::env::temp_dir().join(format!("runnerd-{}-{name}", std::process::id()));
            write_private(&staging, contents, 0o600).await?;

            // install(1) writes a new inode and renames it into place
            let cmd = CommandLine::new("install")
                .args([
                    "-m".to_string(),
                    format!("{mode:o}"),
                    staging.display().to_string(),
                    path.display().to_string(),
                ])
                .with_sudo(true);
            let result = self.executor.run_checked(&cmd).await;
            let _ = tokio::fs::remove_file(&staging).await;
            result?;
        } else {
            let tmp = sibling_tmp(path);
            write_private(&tmp, contents, mode).await?;
            tokio::fs::rename(&tmp, path)
                .await
                .map_err(|e| io_error(path, &e))?;
        }

        debug!(mode = %format!("{mode:o}"), "wrote file");
        Ok(())
    }

    /// Distribution codename (e.g. `jammy`)
    ///
    /// # Errors
    /// Returns `PackageError::ParseError` if `lsb_release` prints nothing
    pub async fn distro_codename(&self) -> Result<String, PackageError> {
        let result = self
            .executor
            .run_checked(&CommandLine::new("lsb_release").arg("-cs"))
            .await?;

        let codename = result.stdout.trim();
        if codename.is_empty() {
            return Err(PackageError::ParseError(
                "lsb_release returned an empty codename".to_string(),
            ));
        }
        Ok(codename.to_string())
    }

    /// Short host name
    ///
    /// # Errors
    /// Returns `PackageError::ParseError` if `hostname` prints nothing
    pub async fn hostname(&self) -> Result<String, PackageError> {
        let result = self
            .executor
            .run_checked(&CommandLine::new("hostname"))
            .await?;

        let name = result.stdout.trim();
        if name.is_empty() {
            return Err(PackageError::ParseError(
                "hostname returned an empty name".to_string(),
            ));
        }
        Ok(name.to_string())
    }
}
