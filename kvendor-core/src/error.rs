//! Error types for kvendor-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while reading declarations, lock output, or settings.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The declaration exists but is not a manifest of the expected shape.
    #[error("malformed declaration at {path}: {reason}")]
    MalformedDeclaration { path: PathBuf, reason: String },

    /// A declared directory carries more than one `contents` entry.
    #[error("declaration at {path} has {count} contents entries for '{target}'; exactly one is supported")]
    AmbiguousContents {
        path: PathBuf,
        target: String,
        count: usize,
    },

    /// Two declared entries resolve to the same vendored path.
    #[error("declaration at {path} maps more than one entry to '{target}'")]
    DuplicatePath { path: PathBuf, target: String },

    /// The fetch tool's lock output exists but cannot be parsed.
    #[error("malformed lock output at {path}: {reason}")]
    MalformedLock { path: PathBuf, reason: String },

    /// Settings YAML parse error, with file path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Convenience constructor for [`ManifestError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ManifestError {
    ManifestError::Io {
        path: path.into(),
        source,
    }
}
