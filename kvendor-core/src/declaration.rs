//! Declaration and lock-output reading.
//!
//! # Declaration shape
//!
//! ```text
//! directories:
//! - path: vendor/charts/loki-stack     (target directory)
//!   contents:                          (exactly one entry)
//!   - path: .                          (optional sub-path qualifier)
//!     helmChart: { ... }               (source descriptor)
//! ```
//!
//! Each directory's single `contents` entry is the source descriptor. Its
//! hash is computed over the whole entry with every `secretRef` block
//! removed, so the sub-path qualifier takes part in the hash while credential
//! references do not.
//!
//! The lock output written by the fetch tool has the same `directories` /
//! `contents` shape; each content entry yields one [`Directory`] whose hash is
//! computed over what the tool recorded.

use std::io::ErrorKind;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::{io_err, ManifestError};
use crate::hash::content_hash;
use crate::types::{first_duplicate, DeclarationSet, Directory, LockSet, VendorPath};

const DIRECTORIES_KEY: &str = "directories";
const CONTENTS_KEY: &str = "contents";
const PATH_KEY: &str = "path";
const SECRET_REF_KEY: &str = "secretRef";

// ---------------------------------------------------------------------------
// 1. Declaration
// ---------------------------------------------------------------------------

/// Parse the dependency declaration at `path`.
///
/// Fails with `Io` if the file cannot be read, `MalformedDeclaration` if it
/// is not of the expected shape, `AmbiguousContents` if a directory carries
/// more than one contents entry, and `DuplicatePath` if two entries resolve
/// to the same vendored path.
pub fn read_declaration(path: &Path) -> Result<DeclarationSet, ManifestError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_declaration(path, &contents)
}

/// Parse declaration text; `path` is used for error context only.
pub fn parse_declaration(path: &Path, contents: &str) -> Result<DeclarationSet, ManifestError> {
    let malformed = |reason: String| ManifestError::MalformedDeclaration {
        path: path.to_path_buf(),
        reason,
    };

    let doc: Value = serde_yaml::from_str(contents).map_err(|e| malformed(e.to_string()))?;
    let entries = directories(&doc).map_err(malformed)?;

    let mut dirs = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let base = entry_path(entry, i).map_err(malformed)?;
        let contents = entry
            .get(CONTENTS_KEY)
            .and_then(Value::as_sequence)
            .ok_or_else(|| malformed(format!("directory '{base}' has no `contents` list")))?;

        let content = match contents.as_slice() {
            [] => return Err(malformed(format!("directory '{base}' has empty `contents`"))),
            [single] => single,
            many => {
                return Err(ManifestError::AmbiguousContents {
                    path: path.to_path_buf(),
                    target: base.to_string(),
                    count: many.len(),
                })
            }
        };
        if !content.is_mapping() {
            return Err(malformed(format!(
                "contents of '{base}' is not a mapping"
            )));
        }

        let target = effective_path(&base, content).map_err(malformed)?;
        let mut dir = Directory::new(target, descriptor_hash(content));
        dir.secret = find_secret(content);
        dirs.push(dir);
    }

    if let Some(dup) = first_duplicate(&dirs) {
        return Err(ManifestError::DuplicatePath {
            path: path.to_path_buf(),
            target: dup.to_string(),
        });
    }
    Ok(dirs)
}

// ---------------------------------------------------------------------------
// 2. Lock output
// ---------------------------------------------------------------------------

/// Parse the fetch tool's lock output at `path`.
///
/// Returns an empty set if the file does not exist; a prior run may never
/// have fetched anything. Returns `MalformedLock` if it exists but cannot be
/// parsed.
pub fn read_lock_output(path: &Path) -> Result<LockSet, ManifestError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!("lock output not found: {}", path.display());
            return Ok(Vec::new());
        }
        Err(err) => return Err(io_err(path, err)),
    };
    parse_lock_output(path, &contents)
}

/// Parse lock output text; `path` is used for error context only.
pub fn parse_lock_output(path: &Path, contents: &str) -> Result<LockSet, ManifestError> {
    let malformed = |reason: String| ManifestError::MalformedLock {
        path: path.to_path_buf(),
        reason,
    };

    let doc: Value = serde_yaml::from_str(contents).map_err(|e| malformed(e.to_string()))?;
    let entries = directories(&doc).map_err(malformed)?;

    let mut dirs = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let base = entry_path(entry, i).map_err(malformed)?;
        let contents = match entry.get(CONTENTS_KEY) {
            None | Some(Value::Null) => &[][..],
            Some(Value::Sequence(items)) => items.as_slice(),
            Some(_) => {
                return Err(malformed(format!(
                    "`contents` of '{base}' is not a list"
                )))
            }
        };

        if contents.is_empty() {
            dirs.push(Directory::new(base, String::new()));
            continue;
        }
        for content in contents {
            let target = effective_path(&base, content).map_err(malformed)?;
            dirs.push(Directory::new(target, content_hash(content)));
        }
    }

    if let Some(dup) = first_duplicate(&dirs) {
        return Err(malformed(format!("more than one entry for '{dup}'")));
    }
    Ok(dirs)
}

// ---------------------------------------------------------------------------
// 3. Helpers
// ---------------------------------------------------------------------------

fn directories(doc: &Value) -> Result<&Vec<Value>, String> {
    match doc.get(DIRECTORIES_KEY) {
        Some(Value::Sequence(items)) => Ok(items),
        Some(_) => Err(format!("`{DIRECTORIES_KEY}` is not a list")),
        None => Err(format!("missing top-level `{DIRECTORIES_KEY}` list")),
    }
}

fn entry_path(entry: &Value, index: usize) -> Result<VendorPath, String> {
    let raw = entry
        .get(PATH_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("directories[{index}] has no string `path`"))?;
    VendorPath::try_new(raw).map_err(|e| e.to_string())
}

/// Target path joined with the content's sub-path qualifier, if any.
fn effective_path(base: &VendorPath, content: &Value) -> Result<VendorPath, String> {
    match content.get(PATH_KEY).and_then(Value::as_str) {
        Some(sub_path) => base.try_join(sub_path).map_err(|e| e.to_string()),
        None => Ok(base.clone()),
    }
}

fn descriptor_hash(content: &Value) -> String {
    content_hash(&strip_secret_refs(content))
}

fn strip_secret_refs(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut stripped = Mapping::new();
            for (k, v) in map {
                if k.as_str() == Some(SECRET_REF_KEY) {
                    continue;
                }
                stripped.insert(k.clone(), strip_secret_refs(v));
            }
            Value::Mapping(stripped)
        }
        Value::Sequence(items) => Value::Sequence(items.iter().map(strip_secret_refs).collect()),
        other => other.clone(),
    }
}

/// First `secretRef.name` found in a depth-first walk of the descriptor.
fn find_secret(value: &Value) -> Option<String> {
    match value {
        Value::Mapping(map) => {
            if let Some(name) = map
                .get(SECRET_REF_KEY)
                .and_then(|r| r.get("name"))
                .and_then(Value::as_str)
            {
                return Some(name.to_string());
            }
            map.values().find_map(find_secret)
        }
        Value::Sequence(items) => items.iter().find_map(find_secret),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
