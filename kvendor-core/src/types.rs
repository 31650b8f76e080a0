//! Domain types for vendored directory reconciliation.
//!
//! A [`Directory`] is the common entity shared by the declaration, the fetch
//! tool's lock output, and the persisted sync state. Within any one of those
//! sets, [`VendorPath`] values are unique.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A normalized, `/`-separated path to a vendored directory, relative to the
/// vendor root.
///
/// Construct via [`VendorPath::new`] or [`VendorPath::try_new`] so that
/// `./a//b/`, `a/x/../b/` and `a/b` compare equal. A `VendorPath` never
/// points outside the vendor root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VendorPath(String);

/// A raw path whose `..` segments climb above the vendor root.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path '{0}' escapes the vendor root")]
pub struct EscapesRoot(pub String);

impl VendorPath {
    /// Normalize `raw`: backslashes become `/`, empty and `.` segments are
    /// dropped and `..` removes the preceding segment. A `..` with nothing
    /// left to remove is dropped, so the result stays under the root. An
    /// empty result is `.`.
    pub fn new(raw: &str) -> Self {
        Self::from_segments(normalize(raw).0)
    }

    /// Like [`VendorPath::new`], but rejects a `..` that would climb above
    /// the vendor root.
    pub fn try_new(raw: &str) -> Result<Self, EscapesRoot> {
        match normalize(raw) {
            (segments, false) => Ok(Self::from_segments(segments)),
            (_, true) => Err(EscapesRoot(raw.to_string())),
        }
    }

    fn from_segments(segments: Vec<&str>) -> Self {
        if segments.is_empty() {
            return Self(".".to_string());
        }
        Self(segments.join("/"))
    }

    /// Join a sub-path qualifier onto this path. A `.` qualifier is a no-op.
    pub fn join(&self, sub_path: &str) -> Self {
        Self::new(&format!("{}/{}", self.0, sub_path))
    }

    /// Like [`VendorPath::join`], rejecting a qualifier that leaves the root.
    pub fn try_join(&self, sub_path: &str) -> Result<Self, EscapesRoot> {
        Self::try_new(&format!("{}/{}", self.0, sub_path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve against the vendor root on disk.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

/// Segments of `raw` after lexical cleanup, and whether a `..` had nothing
/// left to remove.
fn normalize(raw: &str) -> (Vec<&str>, bool) {
    let mut segments = Vec::new();
    let mut escapes = false;
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    escapes = true;
                }
            }
            other => segments.push(other),
        }
    }
    (segments, escapes)
}

impl fmt::Display for VendorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VendorPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl TryFrom<String> for VendorPath {
    type Error = EscapesRoot;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_new(&s)
    }
}

impl From<VendorPath> for String {
    fn from(path: VendorPath) -> Self {
        path.0
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// A single vendored content unit.
///
/// `content_hash` identifies either the declared source descriptor or the
/// actually fetched content, depending on which set the entry belongs to.
/// `secret` is an opaque credential reference; it is never serialized into
/// persisted state and never takes part in comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub path: VendorPath,
    #[serde(default)]
    pub content_hash: String,
    #[serde(skip)]
    pub secret: Option<String>,
}

impl Directory {
    pub fn new(path: impl Into<VendorPath>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Copy without the secret reference, as stored in persisted state.
    pub fn without_secret(&self) -> Self {
        Self {
            path: self.path.clone(),
            content_hash: self.content_hash.clone(),
            secret: None,
        }
    }
}

impl PartialEq for Directory {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.content_hash == other.content_hash
    }
}

impl Eq for Directory {}

/// Directories derived from the dependency declaration.
pub type DeclarationSet = Vec<Directory>;

/// Directories reported by the fetch tool after a successful fetch.
pub type LockSet = Vec<Directory>;

// ---------------------------------------------------------------------------
// Set comparisons (order-independent)
// ---------------------------------------------------------------------------

/// Whether `dirs` has an entry at `path`.
pub fn contains_path(dirs: &[Directory], path: &VendorPath) -> bool {
    dirs.iter().any(|d| &d.path == path)
}

/// Whether `dirs` has an entry at `path` with exactly `content_hash`.
pub fn contains_exact(dirs: &[Directory], path: &VendorPath, content_hash: &str) -> bool {
    dirs.iter()
        .any(|d| &d.path == path && d.content_hash == content_hash)
}

/// Paths of `expected` absent from `actual`, sorted.
pub fn missing_paths(expected: &[Directory], actual: &[Directory]) -> Vec<VendorPath> {
    let actual: BTreeSet<&VendorPath> = actual.iter().map(|d| &d.path).collect();
    let missing: BTreeSet<VendorPath> = expected
        .iter()
        .filter(|d| !actual.contains(&d.path))
        .map(|d| d.path.clone())
        .collect();
    missing.into_iter().collect()
}

/// Set equality on `path` only, ignoring order and hashes.
pub fn paths_match(a: &[Directory], b: &[Directory]) -> bool {
    let a: BTreeSet<&VendorPath> = a.iter().map(|d| &d.path).collect();
    let b: BTreeSet<&VendorPath> = b.iter().map(|d| &d.path).collect();
    a == b
}

/// Index a set by path. Later duplicates overwrite earlier ones; callers that
/// need uniqueness should check with [`first_duplicate`] first.
pub fn by_path(dirs: &[Directory]) -> HashMap<&VendorPath, &Directory> {
    dirs.iter().map(|d| (&d.path, d)).collect()
}

/// The first path appearing more than once, in input order.
pub fn first_duplicate(dirs: &[Directory]) -> Option<&VendorPath> {
    let mut seen = BTreeSet::new();
    dirs.iter().map(|d| &d.path).find(|p| !seen.insert(*p))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
