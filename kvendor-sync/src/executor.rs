//! Bounded fan-out over independent work items.
//!
//! [`run_all`] runs one future per item with at most `concurrency` in flight.
//! A failing item never cancels its siblings: every item runs to completion
//! and all failures are gathered, in the order they were observed.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Concurrency ceiling for [`run_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    #[default]
    Unbounded,
    Limited(NonZeroUsize),
}

impl Concurrency {
    /// `limit <= 0` means unbounded.
    pub fn from_limit(limit: i64) -> Self {
        usize::try_from(limit)
            .ok()
            .and_then(NonZeroUsize::new)
            .map_or(Concurrency::Unbounded, Concurrency::Limited)
    }
}

/// A failure of one item, identified by its position in the input.
#[derive(Debug)]
pub struct ItemFailure<E> {
    pub index: usize,
    pub error: E,
}

/// Every failure of a [`run_all`] call, in observed order.
#[derive(Debug)]
pub struct FanOutError<E> {
    pub total: usize,
    pub failures: Vec<ItemFailure<E>>,
}

impl<E> FanOutError<E> {
    /// The representative, first-observed failure.
    pub fn first(&self) -> Option<&E> {
        self.failures.first().map(|f| &f.error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &E> {
        self.failures.iter().map(|f| &f.error)
    }
}

impl<E: fmt::Display> fmt::Display for FanOutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} item(s) failed", self.failures.len(), self.total)?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure.error)?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for FanOutError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Run `f` once for every item, at most `concurrency` at a time.
///
/// Items are submitted in input order; completion order is unspecified.
/// Returns `Ok(())` if every invocation succeeded. A panic in one invocation
/// is re-raised after every other invocation has finished.
pub async fn run_all<T, E, F, Fut>(
    items: Vec<T>,
    concurrency: Concurrency,
    f: F,
) -> Result<(), FanOutError<E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    let total = items.len();
    let semaphore = match concurrency {
        Concurrency::Unbounded => None,
        Concurrency::Limited(n) => Some(Arc::new(Semaphore::new(n.get()))),
    };

    let mut tasks = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        // Queue here until a slot frees; the semaphore is never closed.
        let permit = match &semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        let fut = f(item);
        tasks.spawn(async move {
            let result = fut.await;
            drop(permit);
            (index, result)
        });
    }

    let mut failures = Vec::new();
    let mut panic = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((index, Err(error))) => failures.push(ItemFailure { index, error }),
            Err(err) => {
                if let Ok(payload) = err.try_into_panic() {
                    panic.get_or_insert(payload);
                }
            }
        }
    }

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(FanOutError { total, failures })
    }
}
