//! Multi-unit runs: ordering, failure isolation and bounded concurrency.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kvendor_core::{SyncSettings, SyncUnit};
use kvendor_sync::{
    reconcile_all, reconcile_all_blocking, Concurrency, FetchError, FetchRequest, Fetcher,
    Reconciler, SyncError, SyncOutcome,
};
use tempfile::TempDir;

fn declaration(name: &str) -> String {
    format!(
        "directories:\n- path: vendor/{name}\n  contents:\n  - path: .\n    helmChart: {{name: {name}}}\n"
    )
}

/// Fails for units whose declaration mentions `broken`; tracks peak overlap.
#[derive(Default)]
struct TrackingFetcher {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Fetcher for TrackingFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = fs::read_to_string(request.declaration).unwrap();
        if text.contains("broken") {
            return Err(FetchError::Failed {
                program: "vendir".to_string(),
                code: Some(2),
                stdout: String::new(),
                stderr: "repository unreachable".to_string(),
            });
        }
        let declared = kvendor_core::read_declaration(request.declaration).unwrap();
        for dir in &declared {
            fs::create_dir_all(dir.path.to_path(request.root)).unwrap();
        }
        fs::write(request.lock, text).unwrap();
        Ok(())
    }
}

fn workspace(names: &[&str]) -> (TempDir, Vec<SyncUnit>) {
    let tmp = TempDir::new().unwrap();
    let settings = SyncSettings::default();
    let units = names
        .iter()
        .map(|name| {
            let app_dir = tmp.path().join(name);
            fs::create_dir_all(&app_dir).unwrap();
            fs::write(app_dir.join(&settings.declaration_file), declaration(name)).unwrap();
            SyncUnit::from_settings(*name, &app_dir, &settings)
        })
        .collect();
    (tmp, units)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outcomes_follow_input_order() {
    let (_tmp, units) = workspace(&["zeta", "alpha", "mid"]);
    let reconciler = Arc::new(Reconciler::new(TrackingFetcher::default()));

    let outcomes = reconcile_all(reconciler, units, Concurrency::from_limit(2))
        .await
        .unwrap();

    let names: Vec<&str> = outcomes.iter().map(|o| o.unit.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    assert!(outcomes.iter().all(|o| o.outcome.did_fetch()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_failing_unit_does_not_stop_the_others() {
    let (tmp, units) = workspace(&["one", "broken", "three", "four"]);
    let reconciler = Arc::new(Reconciler::new(TrackingFetcher::default()));

    let err = reconcile_all(Arc::clone(&reconciler), units.clone(), Concurrency::from_limit(2))
        .await
        .unwrap_err();

    assert_eq!(reconciler.fetcher().calls.load(Ordering::SeqCst), 4);
    let SyncError::Batch(batch) = &err else {
        panic!("expected Batch, got {err}");
    };
    assert_eq!(batch.total, 4);
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].index, 1);
    match batch.first() {
        Some(SyncError::Unit { unit, source }) => {
            assert_eq!(unit, "broken");
            assert!(matches!(**source, SyncError::Fetch(FetchError::Failed { .. })));
        }
        other => panic!("expected Unit error, got {other:?}"),
    }
    assert!(err.to_string().contains("unit 'broken'"));

    for name in ["one", "three", "four"] {
        assert!(tmp.path().join(name).join(".vendir-sync.yaml").exists(), "{name}");
    }
    assert!(!tmp.path().join("broken").join(".vendir-sync.yaml").exists());

    // Healthy units are now current; only the broken one fetches again.
    let rerun = reconcile_all(Arc::clone(&reconciler), units, Concurrency::Unbounded).await;
    assert!(rerun.is_err());
    assert_eq!(reconciler.fetcher().calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limit_bounds_concurrent_fetches() {
    let names = ["a", "b", "c", "d", "e", "f"];
    let (_tmp, units) = workspace(&names);
    let reconciler = Arc::new(Reconciler::new(TrackingFetcher::default()));

    reconcile_all(Arc::clone(&reconciler), units, Concurrency::from_limit(2))
        .await
        .unwrap();

    let fetcher = reconciler.fetcher();
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), names.len());
    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn blocking_entrypoint_skips_current_units() {
    let (_tmp, units) = workspace(&["x", "y"]);
    let fetcher = Arc::new(TrackingFetcher::default());

    let first = reconcile_all_blocking(
        Reconciler::new(Arc::clone(&fetcher)),
        units.clone(),
        Concurrency::Unbounded,
    )
    .unwrap();
    assert!(first.iter().all(|o| o.outcome.did_fetch()));

    let second = reconcile_all_blocking(
        Reconciler::new(Arc::clone(&fetcher)),
        units,
        Concurrency::Unbounded,
    )
    .unwrap();
    assert!(second.iter().all(|o| o.outcome == SyncOutcome::Skipped));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}
