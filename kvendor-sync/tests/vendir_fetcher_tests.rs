//! Subprocess fetcher tests driven by small shell scripts standing in for the
//! fetch tool.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use kvendor_core::SyncUnit;
use kvendor_sync::{FetchError, FetchRequest, Fetcher, Reconciler, SyncOutcome, VendirFetcher};
use rstest::rstest;
use tempfile::TempDir;

const DECLARATION: &str = "directories:\n- path: vendor/app\n  contents:\n  - path: .\n    helmChart: {name: app}\n";

/// Parses `--lock-file=` and `--chdir=`, creates `vendor/app` and writes a lock.
const SYNCING_SCRIPT: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --lock-file=*) lock="${arg#--lock-file=}" ;;
    --chdir=*) root="${arg#--chdir=}" ;;
  esac
done
mkdir -p "$root/vendor/app"
printf 'directories:\n- path: vendor/app\n' > "$lock"
"#;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fetcher_for(dir: &Path, script: &str) -> VendirFetcher {
    let path = dir.join("fake-vendir.sh");
    fs::write(&path, script).unwrap();
    VendirFetcher::new(&format!("sh {}", path.display()))
}

fn unit_in(dir: &Path) -> SyncUnit {
    fs::write(dir.join("vendir.yaml"), DECLARATION).unwrap();
    SyncUnit::new(
        "app",
        dir.join("vendir.yaml"),
        dir.join("vendir.lock.yaml"),
        dir.join(".vendir-sync.yaml"),
    )
}

#[test]
fn successful_tool_run_completes_reconciliation() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let unit = unit_in(tmp.path());
    let reconciler = Reconciler::new(fetcher_for(tmp.path(), SYNCING_SCRIPT));

    let outcome = reconciler.reconcile_unit(&unit).unwrap();
    assert!(outcome.did_fetch());
    assert!(tmp.path().join("vendor/app").is_dir());
    assert!(unit.state.exists());

    assert_eq!(reconciler.reconcile_unit(&unit).unwrap(), SyncOutcome::Skipped);
}

#[rstest]
#[case::stderr("echo 'auth failed for token=abc123' >&2; exit 3", "token=[REDACTED]")]
#[case::stdout("echo 'login password=hunter2'; exit 1", "password=[REDACTED]")]
fn failing_tool_reports_redacted_output(#[case] script: &str, #[case] expected: &str) {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let unit = unit_in(tmp.path());
    let fetcher = fetcher_for(tmp.path(), script);
    let request = FetchRequest {
        declaration: &unit.declaration,
        lock: &unit.lock,
        root: &unit.root,
        secrets: vec![],
    };

    let err = fetcher.fetch(&request).unwrap_err();
    let FetchError::Failed {
        code,
        stdout,
        stderr,
        ..
    } = &err
    else {
        panic!("expected Failed, got {err}");
    };
    assert!(code.is_some_and(|c| c != 0));
    let captured = format!("{stdout}{stderr}");
    assert!(captured.contains(expected), "captured: {captured}");
    assert!(!captured.contains("abc123") && !captured.contains("hunter2"));
    assert!(!unit.state.exists());
}

#[test]
fn missing_program_is_a_spawn_error() {
    let tmp = TempDir::new().unwrap();
    let unit = unit_in(tmp.path());
    let fetcher = VendirFetcher::new("kvendor-test-no-such-program");
    let request = FetchRequest {
        declaration: &unit.declaration,
        lock: &unit.lock,
        root: &unit.root,
        secrets: vec![],
    };
    assert!(matches!(
        fetcher.fetch(&request),
        Err(FetchError::Spawn { .. })
    ));
}

#[test]
fn slow_tool_is_killed_at_the_deadline() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let unit = unit_in(tmp.path());
    let fetcher = fetcher_for(tmp.path(), "exec sleep 30")
        .with_timeout(Some(Duration::from_millis(200)));
    let request = FetchRequest {
        declaration: &unit.declaration,
        lock: &unit.lock,
        root: &unit.root,
        secrets: vec![],
    };

    let started = Instant::now();
    let err = fetcher.fetch(&request).unwrap_err();
    assert!(matches!(err, FetchError::TimedOut { .. }), "got: {err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn background_process_holding_output_does_not_outlive_the_deadline() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let unit = unit_in(tmp.path());
    let fetcher = fetcher_for(tmp.path(), "sleep 3 &\nexit 0\n")
        .with_timeout(Some(Duration::from_millis(200)));
    let request = FetchRequest {
        declaration: &unit.declaration,
        lock: &unit.lock,
        root: &unit.root,
        secrets: vec![],
    };

    let started = Instant::now();
    let err = fetcher.fetch(&request).unwrap_err();
    assert!(matches!(err, FetchError::TimedOut { .. }), "got: {err}");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "fetch took {:?}",
        started.elapsed()
    );
}
