//! Error types for kvendor-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use kvendor_core::{ManifestError, VendorPath};

use crate::executor::FanOutError;

/// All errors that can arise from reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The declaration could not be read, parsed, or was ambiguous.
    #[error("declaration error: {0}")]
    Declaration(#[source] ManifestError),

    /// The fetch tool's lock output could not be read or parsed.
    #[error("lock output error: {0}")]
    Lock(#[source] ManifestError),

    /// The persisted sync state exists but is corrupt.
    #[error("malformed sync state at {path}: {reason}")]
    MalformedState { path: PathBuf, reason: String },

    /// The external fetch tool failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The fetch reported success but did not materialize every declared path.
    #[error("fetch succeeded but lock output is missing declared path(s): {}", join_paths(.missing))]
    Drift { missing: Vec<VendorPath> },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (state store save path).
    #[error("sync state YAML error: {0}")]
    StateSerialize(#[from] serde_yaml::Error),

    /// Two units of one run target the same persisted state file.
    #[error("units '{first}' and '{second}' share sync state {path}")]
    SharedState {
        path: PathBuf,
        first: String,
        second: String,
    },

    /// A failure attributed to one named sync unit.
    #[error("unit '{unit}': {source}")]
    Unit {
        unit: String,
        #[source]
        source: Box<SyncError>,
    },

    /// One or more units of a multi-unit run failed.
    #[error(transparent)]
    Batch(#[from] FanOutError<SyncError>),

    /// The async runtime could not be started or a worker was lost.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Failures of the external fetch tool. Captured output is already redacted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no fetch command configured")]
    NoCommand,

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}: {}", exit_label(.code), summary(.stderr))]
    Failed {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("'{program}' did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("I/O error while waiting for '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

fn join_paths(paths: &[VendorPath]) -> String {
    paths
        .iter()
        .map(VendorPath::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

fn summary(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "no error output"
    } else {
        trimmed
    }
}
