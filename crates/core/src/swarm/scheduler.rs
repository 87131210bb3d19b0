//! # Bounded Task Scheduler
//!
//! Scatter-gather over independent units of work with at most `limit`
//! running at once. Failures (errors and panics) stay with their unit;
//! cancellation stops new starts, abandons in-flight units and keeps every
//! result that already completed.
//!
//! ```text
//! units ──► [permit] ──► spawn ──► JoinSet ──► UnitRecord (completion order)
//!               ▲                     │
//!               └──── permit dropped ◄┘
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why a single unit produced no value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("{0}")]
    Failed(String),
    #[error("unit panicked: {0}")]
    Panicked(String),
}

/// One finished unit, keyed by its submission index
#[derive(Debug)]
pub struct UnitRecord<T> {
    pub index: usize,
    pub outcome: Result<T, UnitError>,
}

/// Everything a batch produced
#[derive(Debug)]
pub struct BatchReport<T> {
    /// Units submitted
    pub total: usize,
    /// Units that were given a slot
    pub started: usize,
    /// Set when the batch stopped early
    pub cancelled: bool,
    /// Finished units in completion order
    pub completed: Vec<UnitRecord<T>>,
}

impl<T> BatchReport<T> {
    /// All units ran to an outcome
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.completed.len() == self.total
    }

    pub fn failures(&self) -> usize {
        self.completed.iter().filter(|r| r.outcome.is_err()).count()
    }

    /// Outcomes keyed by submission index
    pub fn into_indexed(self) -> BTreeMap<usize, Result<T, UnitError>> {
        self.completed
            .into_iter()
            .map(|record| (record.index, record.outcome))
            .collect()
    }
}

/// Per-unit result after the reducer has applied its fallback policy
#[derive(Debug, Clone, PartialEq)]
pub enum UnitResult<T> {
    Ok(T),
    Degraded { value: T, reason: String },
}

impl<T> UnitResult<T> {
    /// Substitute `fallback` for a failed outcome
    pub fn from_outcome(outcome: Result<T, UnitError>, fallback: impl FnOnce() -> T) -> Self {
        match outcome {
            Ok(value) => UnitResult::Ok(value),
            Err(e) => UnitResult::Degraded {
                value: fallback(),
                reason: e.to_string(),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, UnitResult::Degraded { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            UnitResult::Ok(value) | UnitResult::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            UnitResult::Ok(value) | UnitResult::Degraded { value, .. } => value,
        }
    }
}

/// Run `fut` with a timeout; expiry is an ordinary unit failure
pub async fn with_deadline<T, Fut>(timeout: Duration, fut: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("timed out after {}s", timeout.as_secs_f32()),
    }
}

/// Scheduler bound to one session's cancellation scope
#[derive(Debug, Clone)]
pub struct BoundedScheduler {
    limit: usize,
    cancel: CancellationToken,
}

impl BoundedScheduler {
    pub fn new(limit: usize, cancel: CancellationToken) -> Self {
        Self {
            limit: limit.max(1),
            cancel,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Execute every unit, at most `limit` at a time.
    pub async fn run<T, F, Fut>(&self, units: Vec<F>) -> BatchReport<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let total = units.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut pending = units.into_iter().enumerate();
        let mut next = pending.next();
        let mut join_set = JoinSet::new();
        let mut report = BatchReport {
            total,
            started: 0,
            cancelled: false,
            completed: Vec::with_capacity(total),
        };

        loop {
            if next.is_none() && join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }

                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    match joined {
                        Ok((index, Some(outcome))) => report.completed.push(UnitRecord { index, outcome }),
                        Ok((_, None)) => {}
                        Err(e) => tracing::warn!("scheduler task lost: {}", e),
                    }
                }

                permit = semaphore.clone().acquire_owned(), if next.is_some() => {
                    let Ok(permit) = permit else { break };
                    let Some((index, unit)) = next.take() else { continue };
                    let cancel = self.cancel.clone();
                    report.started += 1;

                    join_set.spawn(async move {
                        let _permit = permit;
                        let outcome = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            result = AssertUnwindSafe(unit()).catch_unwind() => Some(match result {
                                Ok(Ok(value)) => Ok(value),
                                Ok(Err(e)) => Err(UnitError::Failed(format!("{:#}", e))),
                                Err(panic) => Err(UnitError::Panicked(panic_message(panic))),
                            }),
                        };
                        (index, outcome)
                    });
                    next = pending.next();
                }
            }
        }

        if report.cancelled {
            // In-flight units observe the token and return without an outcome;
            // anything that finished just before the signal is kept.
            while let Some(joined) = join_set.join_next().await {
                if let Ok((index, Some(outcome))) = joined {
                    report.completed.push(UnitRecord { index, outcome });
                }
            }
            tracing::info!(
                completed = report.completed.len(),
                total,
                "batch cancelled"
            );
        }

        report
    }
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let units: Vec<_> = (0..20)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5 + (i % 3) as u64)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let report = BoundedScheduler::new(4, CancellationToken::new())
            .run(units)
            .await;

        assert!(report.is_complete());
        assert_eq!(report.started, 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_results_keyed_by_index() {
        // Later units finish first.
        let units: Vec<_> = (0..5u64)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                    Ok(i * 10)
                }
            })
            .collect();

        let report = BoundedScheduler::new(5, CancellationToken::new())
            .run(units)
            .await;
        let first_done = report.completed[0].index;
        let indexed = report.into_indexed();

        assert_eq!(first_done, 4);
        for (index, outcome) in indexed {
            assert_eq!(outcome, Ok(index as u64 * 10));
        }
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let units: Vec<_> = (0..6)
            .map(|i| {
                move || async move {
                    if i == 2 {
                        anyhow::bail!("search timed out");
                    }
                    if i == 4 {
                        panic!("bad unit");
                    }
                    Ok(i)
                }
            })
            .collect();

        let report = BoundedScheduler::new(2, CancellationToken::new())
            .run(units)
            .await;

        assert!(report.is_complete());
        assert_eq!(report.failures(), 2);
        let indexed = report.into_indexed();
        assert_eq!(indexed[&2], Err(UnitError::Failed("search timed out".to_string())));
        assert_eq!(indexed[&4], Err(UnitError::Panicked("bad unit".to_string())));
        assert_eq!(indexed[&5], Ok(5));
    }

    #[tokio::test]
    async fn test_cancel_after_three_of_ten() {
        let cancel = CancellationToken::new();
        let entered = Arc::new(AtomicUsize::new(0));
        let blocked = Arc::new(Notify::new());

        let units: Vec<_> = (0..10)
            .map(|i| {
                let entered = entered.clone();
                let blocked = blocked.clone();
                move || async move {
                    entered.fetch_add(1, Ordering::SeqCst);
                    if i == 3 {
                        blocked.notify_one();
                        std::future::pending::<()>().await;
                    }
                    Ok(i)
                }
            })
            .collect();

        let scheduler = BoundedScheduler::new(1, cancel.clone());
        let batch = tokio::spawn(async move { scheduler.run(units).await });

        blocked.notified().await;
        cancel.cancel();
        let report = batch.await.unwrap();

        assert!(report.cancelled);
        assert!(!report.is_complete());
        let indices: Vec<usize> = report.completed.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(report.started, 4);
        assert_eq!(entered.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let units: Vec<fn() -> std::future::Ready<anyhow::Result<()>>> = Vec::new();
        let report = BoundedScheduler::new(3, CancellationToken::new())
            .run(units)
            .await;
        assert!(report.is_complete());
        assert_eq!(report.total, 0);
    }

    #[test]
    fn test_unit_result_fallback() {
        let ok = UnitResult::from_outcome(Ok(1), || 0);
        assert_eq!(ok, UnitResult::Ok(1));

        let degraded =
            UnitResult::from_outcome(Err(UnitError::Failed("timeout".to_string())), || 0);
        assert!(degraded.is_degraded());
        assert_eq!(*degraded.value(), 0);
        assert_eq!(
            degraded,
            UnitResult::Degraded {
                value: 0,
                reason: "timeout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_error() {
        let result: anyhow::Result<()> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }
}
