//! kvendor core library: vendored directory model, hashing, declaration
//! parsing, settings.
//!
//! - [`types`]: [`Directory`] and order-independent set comparisons
//! - [`hash`]: canonical, key-order-independent content hashing
//! - [`declaration`]: declaration and lock-output readers
//! - [`settings`]: [`SyncSettings`] and [`SyncUnit`]
//! - [`error`]: [`ManifestError`]

pub mod declaration;
pub mod error;
pub mod hash;
pub mod settings;
pub mod types;

pub use declaration::{read_declaration, read_lock_output};
pub use error::ManifestError;
pub use settings::{load_settings_at, SyncSettings, SyncUnit};
pub use types::{DeclarationSet, Directory, EscapesRoot, LockSet, VendorPath};
