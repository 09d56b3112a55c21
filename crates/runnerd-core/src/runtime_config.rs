//! In-place rewrite of the runner's global settings
//!
//! Only the top-level `concurrent` and `check_interval` lines are touched.
//! Every other byte of the file, comments and unknown keys included, is kept.

use std::path::Path;

use runnerd_pkg::{HostTools, PackageError};
use tracing::{debug, info, warn};

use crate::error::CoreError;

const CONCURRENT: &str = "concurrent";
const CHECK_INTERVAL: &str = "check_interval";

/// Key of a `key = value` line, if it is one
fn line_key(line: &str) -> Option<&str> {
    let (key, _) = line.split_once('=')?;
    Some(key.trim())
}

/// Rewrite the two global settings in `contents`
///
/// Lines after the first table header belong to a table and are left alone.
/// Missing keys are not added.
#[must_use]
pub fn rewrite_global_settings(contents: &str, concurrency: u32, check_interval: u64) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut in_table = false;

    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];

        if body.trim_start().starts_with('[') {
            in_table = true;
        }

        let replacement = if in_table || body.starts_with(char::is_whitespace) {
            None
        } else {
            match line_key(body) {
                Some(CONCURRENT) => Some(format!("{CONCURRENT} = {concurrency}")),
                Some(CHECK_INTERVAL) => Some(format!("{CHECK_INTERVAL} = {check_interval}")),
                _ => None,
            }
        };

        match replacement {
            Some(new_body) => {
                out.push_str(&new_body);
                out.push_str(ending);
            }
            None => out.push_str(line),
        }
    }

    out
}

/// Apply the settings to the file at `path`
///
/// Returns `Ok(false)` when the file does not exist yet or already holds the
/// desired values. The file keeps its permission bits.
///
/// # Errors
/// Returns `CoreError::RunnerConfigError` if the file cannot be read or
/// replaced
pub async fn apply_to_file(
    host: &HostTools,
    path: &Path,
    concurrency: u32,
    check_interval: u64,
) -> Result<bool, CoreError> {
    let err = |e: PackageError| CoreError::RunnerConfigError(format!("{}: {e}", path.display()));

    let Some(contents) = host.read_file(path).await.map_err(err)? else {
        warn!(path = %path.display(), "runner config not present yet, skipping");
        return Ok(false);
    };

    let updated = rewrite_global_settings(&contents, concurrency, check_interval);
    if updated == contents {
        debug!(path = %path.display(), "runner config already up to date");
        return Ok(false);
    }

    let mode = host.file_mode(path).await.map_err(err)?;
    host.write_file(path, updated.as_bytes(), mode)
        .await
        .map_err(err)?;

    info!(
        path = %path.display(),
        concurrency,
        check_interval,
        "runner config updated"
    );
    Ok(true)
}
