//! Fetch pool: one task per page behind a counting semaphore.
//!
//! The pool owns the strong ends of two queues, records and failed pages. Page
//! tasks only ever hold weak handles, so the queues close as soon as the
//! supervisor lets go of them:
//!
//! - normal completion: after every page task has been joined
//! - cancellation: immediately; in-flight tasks are detached and whatever they
//!   produce afterwards is dropped

use crate::fetcher::PageFetcher;
use crate::types::{FetchOutcome, PageNumber, PageRange, Record};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Records from one successfully fetched page
#[derive(Clone, Debug, PartialEq)]
pub struct PageRecords {
    /// Source page
    pub page: PageNumber,
    /// Records in payload order (may be empty)
    pub records: Vec<Record>,
}

/// What the supervisor did before it released the queues
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Page tasks started
    pub dispatched: usize,
    /// Whether dispatch stopped because of cancellation
    pub cancelled: bool,
}

/// Receiving side of a running pool
#[derive(Debug)]
pub struct PoolHandle {
    /// One message per successful page
    pub records: mpsc::Receiver<PageRecords>,
    /// One message per page that exhausted its attempts
    pub failed: mpsc::Receiver<PageNumber>,
    /// Supervisor task; resolves once both queues have been released
    pub task: JoinHandle<PoolReport>,
}

/// Bounded-concurrency page scheduler
#[derive(Clone, Debug)]
pub struct FetchPool {
    fetcher: PageFetcher,
    concurrency: usize,
    queue_capacity: usize,
}

impl FetchPool {
    /// Create a pool running at most `concurrency` page fetches at once
    ///
    /// `queue_capacity` bounds the records queue in pages; both values are raised to 1
    /// if zero, and `concurrency` is capped at [`Semaphore::MAX_PERMITS`].
    pub fn new(fetcher: PageFetcher, concurrency: usize, queue_capacity: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.clamp(1, Semaphore::MAX_PERMITS),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Start fetching every page in `range`
    ///
    /// Each page is dispatched exactly once, in ascending order, with the admission
    /// permit acquired before its retry loop and released only after its outcome has
    /// been queued. Returns immediately; results arrive on the handle's queues.
    pub fn spawn(&self, range: PageRange, cancel: CancellationToken) -> PoolHandle {
        let (records_tx, records_rx) = mpsc::channel(self.queue_capacity);
        // Sized to the range so a failure report never waits on the consumer
        let (failed_tx, failed_rx) = mpsc::channel(range.len().max(1));

        let fetcher = self.fetcher.clone();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        tracing::info!(
            start = range.start,
            end = range.end,
            pages = range.len(),
            concurrency = self.concurrency,
            "fetch pool started"
        );

        let task = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            let mut report = PoolReport::default();

            for page in range.pages() {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        // Never closed while the supervisor holds it
                        Err(_) => break,
                    },
                };

                let fetcher = fetcher.clone();
                let records = records_tx.downgrade();
                let failed = failed_tx.downgrade();
                let cancel = cancel.clone();

                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = fetcher.fetch(page).await;
                    deliver(outcome, &records, &failed, &cancel).await;
                });
                report.dispatched += 1;

                // Reap finished tasks so the set stays proportional to the permits
                while let Some(result) = tasks.try_join_next() {
                    log_join_error(result);
                }
            }

            // Join barrier; cancellation can still cut it short
            while !report.cancelled {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => report.cancelled = true,
                    next = tasks.join_next() => match next {
                        Some(result) => log_join_error(result),
                        None => break,
                    },
                }
            }

            drop(records_tx);
            drop(failed_tx);

            if report.cancelled {
                let in_flight = tasks.len();
                tasks.detach_all();
                tracing::warn!(
                    dispatched = report.dispatched,
                    in_flight,
                    "fetch pool cancelled, queues closed"
                );
                return report;
            }

            tracing::info!(dispatched = report.dispatched, "fetch pool finished");
            report
        });

        PoolHandle {
            records: records_rx,
            failed: failed_rx,
            task,
        }
    }
}

/// Queue one page's outcome, unless the queue is already gone
async fn deliver(
    outcome: FetchOutcome,
    records: &mpsc::WeakSender<PageRecords>,
    failed: &mpsc::WeakSender<PageNumber>,
    cancel: &CancellationToken,
) {
    match outcome {
        FetchOutcome::Success { page, records: batch } => {
            tracing::debug!(page = page.0, records = batch.len(), "processing records from page");
            let Some(tx) = records.upgrade() else {
                tracing::trace!(page = page.0, "records queue closed, result dropped");
                return;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                result = tx.send(PageRecords { page, records: batch }) => {
                    if result.is_err() {
                        tracing::trace!(page = page.0, "records queue closed, result dropped");
                    }
                }
            }
        }
        FetchOutcome::Failure { page } => {
            tracing::warn!(page = page.0, "page failed");
            let Some(tx) = failed.upgrade() else {
                return;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tx.send(page) => {}
            }
        }
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::error!(error = %e, "page task panicked");
    }
}
