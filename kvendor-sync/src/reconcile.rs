//! Reconciliation of declared vendored directories against persisted state.
//!
//! ## `Reconciler::reconcile_unit` steps
//!
//! 1. Load the declaration `D`.
//! 2. Load the persisted state `S` (empty if absent).
//! 3. Skip if `S` holds exactly `D`'s path/hash pairs and every declared
//!    directory exists on disk.
//! 4. Invoke the fetcher.
//! 5. Load the fresh lock output `L`.
//! 6. Fail with drift if any declared path is missing from `L`.
//! 7. Persist `D`'s own paths and hashes as the new state.
//!
//! Only step 7 writes state; every earlier failure leaves it untouched.
//!
//! Signal precedence for [`check`]:
//! 1. `NeverSynced` (state missing or empty)
//! 2. `Changed` (declared path/hash not in state, or state path no longer declared)
//! 3. `Missing` (state matches but a declared directory is absent on disk)
//! 4. `Current`
//!
//! An empty declaration short-circuits to `Current`.

use std::collections::BTreeSet;
use std::path::Path;

use kvendor_core::{
    declaration::{read_declaration, read_lock_output},
    types::{by_path, missing_paths, Directory},
    SyncUnit, VendorPath,
};

use crate::error::SyncError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::state_store;

// ---------------------------------------------------------------------------
// Skip decision
// ---------------------------------------------------------------------------

/// Whether a unit's vendored directories need a fetch, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    NeverSynced,
    Current,
    Changed { paths: Vec<VendorPath> },
    Missing { paths: Vec<VendorPath> },
}

impl SyncSignal {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, SyncSignal::Current)
    }
}

/// Compare the declaration with persisted state and the vendored tree under
/// `root`. Pure apart from directory existence checks.
pub fn check(declared: &[Directory], state: &[Directory], root: &Path) -> SyncSignal {
    if declared.is_empty() {
        return SyncSignal::Current;
    }
    if state.is_empty() {
        return SyncSignal::NeverSynced;
    }

    let stored = by_path(state);
    let mut changed: BTreeSet<VendorPath> = declared
        .iter()
        .filter(|d| {
            stored
                .get(&d.path)
                .map_or(true, |s| s.content_hash != d.content_hash)
        })
        .map(|d| d.path.clone())
        .collect();
    // State entries that are no longer declared break set equality too.
    changed.extend(missing_paths(state, declared));
    if !changed.is_empty() {
        return SyncSignal::Changed {
            paths: changed.into_iter().collect(),
        };
    }

    let missing: Vec<VendorPath> = declared
        .iter()
        .filter(|d| !d.path.to_path(root).is_dir())
        .map(|d| d.path.clone())
        .collect();
    if !missing.is_empty() {
        return SyncSignal::Missing { paths: missing };
    }

    SyncSignal::Current
}

/// Load a unit's declaration and state and run [`check`]. No side effects.
pub fn check_unit(unit: &SyncUnit) -> Result<SyncSignal, SyncError> {
    let declared = read_declaration(&unit.declaration).map_err(SyncError::Declaration)?;
    let state = state_store::load_at(&unit.state)?;
    Ok(check(&declared, &state, &unit.root))
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Outcome of reconciling one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// State matched the declaration and every directory was present.
    Skipped,
    /// The fetcher ran and the new state was persisted.
    Fetched { reason: SyncSignal },
    /// Dry-run mode: a fetch *would* have run.
    WouldFetch { reason: SyncSignal },
}

impl SyncOutcome {
    pub fn did_fetch(&self) -> bool {
        matches!(self, SyncOutcome::Fetched { .. })
    }
}

/// Drives the skip/fetch/validate/persist cycle through a [`Fetcher`].
///
/// Holds no per-unit state; one reconciler may serve many units concurrently
/// as long as no two of them share a state path.
#[derive(Debug)]
pub struct Reconciler<F> {
    fetcher: F,
    dry_run: bool,
}

impl<F: Fetcher> Reconciler<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            dry_run: false,
        }
    }

    /// In dry-run mode the fetcher is never invoked and state is never written.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Reconcile using the declaration's parent directory as vendor root.
    pub fn reconcile(
        &self,
        declaration: &Path,
        lock: &Path,
        state: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        let unit = SyncUnit::new(declaration.display().to_string(), declaration, lock, state);
        self.reconcile_unit(&unit)
    }

    pub fn reconcile_unit(&self, unit: &SyncUnit) -> Result<SyncOutcome, SyncError> {
        // Steps 1-2.
        let declared = read_declaration(&unit.declaration).map_err(SyncError::Declaration)?;
        let state = state_store::load_at(&unit.state)?;

        // Step 3.
        let signal = check(&declared, &state, &unit.root);
        if !signal.needs_fetch() {
            tracing::debug!("[{}] up to date, skipping fetch", unit.name);
            return Ok(SyncOutcome::Skipped);
        }
        if self.dry_run {
            tracing::info!("[dry-run] [{}] would fetch: {signal:?}", unit.name);
            return Ok(SyncOutcome::WouldFetch { reason: signal });
        }

        // Step 4.
        tracing::info!("[{}] fetching: {signal:?}", unit.name);
        let request = FetchRequest {
            declaration: &unit.declaration,
            lock: &unit.lock,
            root: &unit.root,
            secrets: declared.iter().filter_map(|d| d.secret.as_deref()).collect(),
        };
        self.fetcher.fetch(&request)?;

        // Steps 5-6.
        let locked = read_lock_output(&unit.lock).map_err(SyncError::Lock)?;
        let missing = missing_paths(&declared, &locked);
        if !missing.is_empty() {
            tracing::warn!("[{}] drift after fetch: {missing:?}", unit.name);
            return Err(SyncError::Drift { missing });
        }

        // Step 7: declared hashes, not the lock's.
        state_store::save_at(&unit.state, &declared)?;
        tracing::info!("[{}] synced {} directories", unit.name, declared.len());
        Ok(SyncOutcome::Fetched { reason: signal })
    }
}
