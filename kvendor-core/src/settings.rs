//! Sync settings and per-application sync units.
//!
//! Settings are passed explicitly into every operation; nothing here reads
//! environment variables or the user's home directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ManifestError};

pub const DEFAULT_FETCH_COMMAND: &str = "vendir";
pub const DEFAULT_DECLARATION_FILE: &str = "vendir.yaml";
pub const DEFAULT_LOCK_FILE: &str = "vendir.lock.yaml";
pub const DEFAULT_STATE_FILE: &str = ".vendir-sync.yaml";

/// Settings shared by every sync unit of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Fetch tool command line; the first word is the program.
    pub fetch_command: String,
    /// Extra arguments appended to every fetch invocation.
    pub extra_fetch_args: Vec<String>,
    pub declaration_file: String,
    pub lock_file: String,
    pub state_file: String,
    /// Maximum concurrent units; `<= 0` means unbounded.
    pub concurrency: i64,
    /// Kill a fetch that runs longer than this. Absent means no deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_command: DEFAULT_FETCH_COMMAND.to_string(),
            extra_fetch_args: Vec::new(),
            declaration_file: DEFAULT_DECLARATION_FILE.to_string(),
            lock_file: DEFAULT_LOCK_FILE.to_string(),
            state_file: DEFAULT_STATE_FILE.to_string(),
            concurrency: 0,
            fetch_timeout_secs: None,
        }
    }
}

impl SyncSettings {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

/// Load settings from `path`.
///
/// Returns defaults if the file does not exist, `ManifestError::Settings`
/// (with path + line context) if it is malformed.
pub fn load_settings_at(path: &Path) -> Result<SyncSettings, ManifestError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(SyncSettings::default()),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(SyncSettings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ManifestError::Settings {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Sync unit
// ---------------------------------------------------------------------------

/// One independently reconcilable application/environment.
///
/// No two units reconciled concurrently may share a `state` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUnit {
    /// Human-readable label used in logs and error context.
    pub name: String,
    pub declaration: PathBuf,
    pub lock: PathBuf,
    pub state: PathBuf,
    /// Directory that declared paths are relative to.
    pub root: PathBuf,
}

impl SyncUnit {
    /// Unit rooted at the declaration's parent directory.
    pub fn new(
        name: impl Into<String>,
        declaration: impl Into<PathBuf>,
        lock: impl Into<PathBuf>,
        state: impl Into<PathBuf>,
    ) -> Self {
        let declaration = declaration.into();
        let root = declaration
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            name: name.into(),
            declaration,
            lock: lock.into(),
            state: state.into(),
            root,
        }
    }

    /// Unit for an application directory laid out per `settings`.
    pub fn from_settings(name: impl Into<String>, app_dir: &Path, settings: &SyncSettings) -> Self {
        Self {
            name: name.into(),
            declaration: app_dir.join(&settings.declaration_file),
            lock: app_dir.join(&settings.lock_file),
            state: app_dir.join(&settings.state_file),
            root: app_dir.to_path_buf(),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }
}
