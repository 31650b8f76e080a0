//! External fetch tool boundary.
//!
//! The reconciler decides *whether* to fetch; a [`Fetcher`] does the fetch.
//! [`VendirFetcher`] runs the tool as a subprocess:
//!
//! ```text
//! <command...> sync --file=<declaration> --lock-file=<lock> --chdir=<root> [extra args...]
//! ```
//!
//! Any non-zero exit is a [`FetchError::Failed`] carrying redacted
//! stdout/stderr.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use kvendor_core::SyncSettings;

use crate::error::FetchError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Matches `password=…`, `secret=…`, `token=…` and captures the field name.
static SENSITIVE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(password|secret|token)=(\S+)").unwrap());

/// Replace the value of every sensitive `field=value` token with `[REDACTED]`.
pub fn redact(text: &str) -> String {
    SENSITIVE_FIELD
        .replace_all(text, "$1=[REDACTED]")
        .into_owned()
}

/// Everything a fetcher needs for one unit.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub declaration: &'a Path,
    pub lock: &'a Path,
    /// Vendor root that declared paths are relative to.
    pub root: &'a Path,
    /// Secret references declared by the unit, for the fetcher to resolve.
    pub secrets: Vec<&'a str>,
}

/// Materializes declared directories on disk and writes the lock output.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), FetchError> {
        (**self).fetch(request)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), FetchError> {
        (**self).fetch(request)
    }
}

// ---------------------------------------------------------------------------
// VendirFetcher
// ---------------------------------------------------------------------------

/// Runs the fetch tool as a subprocess.
#[derive(Debug, Clone)]
pub struct VendirFetcher {
    command: Vec<String>,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
}

impl VendirFetcher {
    /// `command` is split on whitespace; the first word is the program.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.split_whitespace().map(str::to_string).collect(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(&settings.fetch_command)
            .with_extra_args(settings.extra_fetch_args.clone())
            .with_timeout(settings.fetch_timeout())
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(&self, request: &FetchRequest<'_>) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        args.push("sync".to_string());
        args.push(format!("--file={}", request.declaration.display()));
        args.push(format!("--lock-file={}", request.lock.display()));
        args.push(format!("--chdir={}", request.root.display()));
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Fetcher for VendirFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), FetchError> {
        let program = self.command.first().ok_or(FetchError::NoCommand)?.clone();
        let args = self.args(request);
        tracing::info!("running {program} {}", redact(&args.join(" ")));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = wait_with_deadline(child, &program, self.timeout)?;
        if output.status.success() {
            tracing::debug!("{program} finished: {}", request.root.display());
            return Ok(());
        }

        let err = FetchError::Failed {
            program,
            code: output.status.code(),
            stdout: redact(&output.stdout),
            stderr: redact(&output.stderr),
        };
        tracing::warn!("{err}");
        Err(err)
    }
}

struct CapturedOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Wait for `child`, draining its pipes on helper threads.
///
/// The deadline covers both the exit and the output reads: a child is killed
/// once `timeout` elapses, and a process left behind holding the pipes open
/// past the deadline also yields `TimedOut`. Drain threads still reading at
/// that point are detached.
fn wait_with_deadline(
    mut child: Child,
    program: &str,
    timeout: Option<Duration>,
) -> Result<CapturedOutput, FetchError> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
    let io = |source: std::io::Error| FetchError::Io {
        program: program.to_string(),
        source,
    };
    let timed_out = |timeout: Duration| FetchError::TimedOut {
        program: program.to_string(),
        timeout,
    };

    let status = match deadline {
        None => child.wait().map_err(io)?,
        Some((at, timeout)) => loop {
            if let Some(status) = child.try_wait().map_err(io)? {
                break status;
            }
            if Instant::now() >= at {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!("{program} killed after {timeout:?}");
                return Err(timed_out(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        },
    };

    let at = deadline.map(|(at, _)| at);
    match (collect(&stdout, at), collect(&stderr, at)) {
        (Some(stdout), Some(stderr)) => Ok(CapturedOutput {
            status,
            stdout,
            stderr,
        }),
        _ => {
            let timeout = deadline.map(|(_, timeout)| timeout).unwrap_or_default();
            tracing::warn!("{program} output still open after {timeout:?}");
            Err(timed_out(timeout))
        }
    }
}

/// Read `pipe` to the end on a helper thread; the text arrives on the
/// returned channel. A missing pipe disconnects immediately.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
    }
    rx
}

/// Drained text, or `None` if `deadline` passed first.
fn collect(rx: &Receiver<String>, deadline: Option<Instant>) -> Option<String> {
    let Some(deadline) = deadline else {
        return Some(rx.recv().unwrap_or_default());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}
