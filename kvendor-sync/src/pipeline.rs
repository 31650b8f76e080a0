//! Multi-unit reconciliation entrypoint.
//!
//! Each unit is reconciled on the blocking pool (the fetcher is a subprocess
//! wait) with at most `concurrency` units in flight. One unit's failure never
//! stops the others.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use kvendor_core::SyncUnit;

use crate::error::SyncError;
use crate::executor::{run_all, Concurrency};
use crate::fetch::Fetcher;
use crate::reconcile::{Reconciler, SyncOutcome};

/// Result of reconciling one named unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub unit: String,
    pub outcome: SyncOutcome,
}

/// Reconcile every unit, returning outcomes in input order.
///
/// Fails with [`SyncError::SharedState`] before any work starts if two units
/// point at the same state file. Otherwise every unit runs; if any fail the
/// result is [`SyncError::Batch`] holding each failure wrapped in
/// [`SyncError::Unit`].
pub async fn reconcile_all<F>(
    reconciler: Arc<Reconciler<F>>,
    units: Vec<SyncUnit>,
    concurrency: Concurrency,
) -> Result<Vec<UnitOutcome>, SyncError>
where
    F: Fetcher + 'static,
{
    reject_shared_state(&units)?;

    let total = units.len();
    let collected = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let indexed: Vec<(usize, SyncUnit)> = units.into_iter().enumerate().collect();

    run_all(indexed, concurrency, |(index, unit)| {
        let reconciler = Arc::clone(&reconciler);
        let collected = Arc::clone(&collected);
        async move {
            let name = unit.name.clone();
            let joined =
                tokio::task::spawn_blocking(move || reconciler.reconcile_unit(&unit)).await;
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => Err(SyncError::Runtime(format!(
                    "reconcile task join error: {err}"
                ))),
            };
            match result {
                Ok(outcome) => {
                    collected.lock().await.push((index, UnitOutcome { unit: name, outcome }));
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!("[{name}] reconcile failed: {err}");
                    Err(SyncError::Unit {
                        unit: name,
                        source: Box::new(err),
                    })
                }
            }
        }
    })
    .await?;

    let mut outcomes = std::mem::take(&mut *collected.lock().await);
    outcomes.sort_by_key(|(index, _)| *index);
    let fetched = outcomes.iter().filter(|(_, o)| o.outcome.did_fetch()).count();
    tracing::info!("reconciled {total} unit(s), {fetched} fetched");
    Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
}

/// Blocking wrapper around [`reconcile_all`] on a fresh multi-thread runtime.
pub fn reconcile_all_blocking<F>(
    reconciler: Reconciler<F>,
    units: Vec<SyncUnit>,
    concurrency: Concurrency,
) -> Result<Vec<UnitOutcome>, SyncError>
where
    F: Fetcher + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| SyncError::Runtime(format!("failed to start runtime: {e}")))?;
    runtime.block_on(reconcile_all(Arc::new(reconciler), units, concurrency))
}

fn reject_shared_state(units: &[SyncUnit]) -> Result<(), SyncError> {
    let mut seen: HashMap<&Path, &str> = HashMap::new();
    for unit in units {
        if let Some(first) = seen.insert(&unit.state, &unit.name) {
            return Err(SyncError::SharedState {
                path: unit.state.clone(),
                first: first.to_string(),
                second: unit.name.clone(),
            });
        }
    }
    Ok(())
}
