//! # kvendor-sync
//!
//! Hash-gated reconciliation of vendored directories.
//!
//! Call [`Reconciler::reconcile_unit`] to bring one unit's vendored tree in
//! line with its declaration, fetching only when the declaration changed or a
//! directory went missing. [`reconcile_all`] does the same for many units
//! with bounded concurrency.

pub mod error;
pub mod executor;
pub mod fetch;
pub mod pipeline;
pub mod reconcile;
pub mod state_store;

pub use error::{FetchError, SyncError};
pub use executor::{run_all, Concurrency, FanOutError, ItemFailure};
pub use fetch::{redact, FetchRequest, Fetcher, VendirFetcher};
pub use pipeline::{reconcile_all, reconcile_all_blocking, UnitOutcome};
pub use reconcile::{check, check_unit, Reconciler, SyncOutcome, SyncSignal};
