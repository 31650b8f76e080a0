//! Sync state store: the persisted record of the last declaration that was
//! successfully satisfied.
//!
//! The file is a YAML sequence in path-ascending order:
//!
//! ```text
//! - path: vendor/charts/app
//!   contentHash: 6fc0b070...
//! ```
//!
//! Writes use the atomic `.tmp` + rename pattern, so a concurrent reader sees
//! either the previous file or the new one, never a partial write.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use kvendor_core::types::{first_duplicate, Directory};

use crate::error::{io_err, SyncError};

/// In-memory sync state: path + content hash per directory.
pub type SyncState = Vec<Directory>;

/// Load the sync state at `path`.
///
/// Returns an empty state if the file does not yet exist.
pub fn load_at(path: &Path) -> Result<SyncState, SyncError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let state: SyncState =
        serde_yaml::from_str(&contents).map_err(|e| SyncError::MalformedState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if let Some(dup) = first_duplicate(&state) {
        return Err(SyncError::MalformedState {
            path: path.to_path_buf(),
            reason: format!("more than one entry for '{dup}'"),
        });
    }
    Ok(state)
}

/// Save `state` to `path` atomically, sorted by path.
///
/// Creates parent directories as needed. Writes and syncs `<path>.tmp`, then
/// renames it to `<path>`; on failure the `.tmp` file is removed and the
/// previous state is left intact.
pub fn save_at(path: &Path, state: &[Directory]) -> Result<(), SyncError> {
    let tmp = tmp_path(path);
    save_with_tmp(path, state, &tmp)
}

/// `<path>.tmp`, alongside the target so the rename never crosses filesystems.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn save_with_tmp(path: &Path, state: &[Directory], tmp: &Path) -> Result<(), SyncError> {
    let mut sorted: SyncState = state.iter().map(Directory::without_secret).collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    let yaml = serde_yaml::to_string(&sorted)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    write_synced(tmp, yaml.as_bytes()).map_err(|e| {
        let _ = std::fs::remove_file(tmp);
        io_err(tmp, e)
    })?;
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }
    tracing::debug!("saved sync state ({} entries): {}", sorted.len(), path.display());
    Ok(())
}

/// Write `bytes` to `path` and flush them to disk before returning.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
