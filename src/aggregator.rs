//! Result aggregator: fan-in of both pool queues into transactional batches.
//!
//! One task waits on three things at once: the records queue, the failed-page
//! queue and the status timer. Records are appended to a single open batch that is
//! flushed whenever it fills up, and once more after both queues have closed.

use crate::config::AggregatorConfig;
use crate::db::CatalogSink;
use crate::notifier::Notifier;
use crate::pool::PageRecords;
use crate::types::{PageNumber, ProgressSnapshot, Record, RunSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one aggregation run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregatorState {
    /// Both queues open
    Running,
    /// One queue closed, the other still delivering
    Draining,
    /// Both queues closed (or cancelled) and the final flush attempted
    Done,
}

/// Batching consumer of the fetch pool's output
pub struct Aggregator {
    sink: Arc<dyn CatalogSink>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
    report_interval: Duration,
    state: AggregatorState,
    batch: Vec<Record>,
    processed: u64,
    last_reported: u64,
    failed_pages: Vec<PageNumber>,
    batches_committed: u64,
    records_committed: u64,
    flush_errors: u64,
    reports: JoinSet<()>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("state", &self.state)
            .field("batch_size", &self.batch_size)
            .field("pending", &self.batch.len())
            .field("processed", &self.processed)
            .field("failed", &self.failed_pages.len())
            .field("status_in_flight", &!self.reports.is_empty())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Create an aggregator writing to `sink` and reporting to `notifier`
    pub fn new(
        sink: Arc<dyn CatalogSink>,
        notifier: Arc<dyn Notifier>,
        config: &AggregatorConfig,
    ) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            sink,
            notifier,
            batch_size,
            // tokio intervals cannot have a zero period
            report_interval: config.report_interval.max(Duration::from_millis(1)),
            state: AggregatorState::Running,
            batch: Vec::with_capacity(batch_size),
            processed: 0,
            last_reported: 0,
            failed_pages: Vec::new(),
            batches_committed: 0,
            records_committed: 0,
            flush_errors: 0,
            reports: JoinSet::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Current progress counters
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed,
            failed: self.failed_pages.len() as u64,
        }
    }

    /// Consume both queues until they close, then flush and summarize
    ///
    /// The final flush is attempted exactly once, even when the batch is empty.
    /// On cancellation, outcomes still sitting in the queues are discarded but the
    /// records already accepted into the batch are flushed.
    pub async fn run(
        &mut self,
        mut records: mpsc::Receiver<PageRecords>,
        mut failed: mpsc::Receiver<PageNumber>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.report_interval,
            self.report_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut records_open = true;
        let mut failed_open = true;
        let mut cancelled = false;

        while records_open || failed_open {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                msg = records.recv(), if records_open => match msg {
                    Some(PageRecords { page, records: page_records }) => {
                        tracing::trace!(page = page.0, records = page_records.len(), "page received");
                        for record in page_records {
                            self.accept(record).await;
                        }
                    }
                    None => {
                        records_open = false;
                        self.queue_closed("records");
                    }
                },
                msg = failed.recv(), if failed_open => match msg {
                    Some(page) => self.failed_pages.push(page),
                    None => {
                        failed_open = false;
                        self.queue_closed("failed");
                    }
                },
                _ = ticker.tick() => self.report(),
            }
        }

        if cancelled {
            // Discard whatever is still queued
            records.close();
            failed.close();
            tracing::warn!(
                pending = self.batch.len(),
                processed = self.processed,
                "aggregation cancelled, flushing accepted records"
            );
        }

        self.flush().await;
        if cancelled {
            self.reports.abort_all();
        }
        while let Some(result) = self.reports.join_next().await {
            log_report_panic(result);
        }
        self.state = AggregatorState::Done;

        let mut failed_pages = std::mem::take(&mut self.failed_pages);
        failed_pages.sort_unstable();

        let summary = RunSummary {
            processed: self.processed,
            failed_pages,
            batches_committed: self.batches_committed,
            records_committed: self.records_committed,
            flush_errors: self.flush_errors,
            cancelled,
        };

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed(),
            batches = summary.batches_committed,
            flush_errors = summary.flush_errors,
            cancelled,
            "aggregation finished"
        );
        summary
    }

    async fn accept(&mut self, record: Record) {
        self.batch.push(record);
        self.processed += 1;
        if self.batch.len() >= self.batch_size {
            self.flush().await;
        }
    }

    fn queue_closed(&mut self, queue: &'static str) {
        tracing::debug!(queue, "input queue closed");
        if self.state == AggregatorState::Running {
            self.state = AggregatorState::Draining;
        }
    }

    /// Hand the open batch to the sink and start a new one, whatever the result
    async fn flush(&mut self) {
        let size = self.batch.len();
        match self.sink.persist(&self.batch).await {
            Ok(()) => {
                if size > 0 {
                    self.batches_committed += 1;
                    self.records_committed += size as u64;
                    tracing::info!(batch_size = size, "batch flushed");
                }
            }
            Err(e) => {
                self.flush_errors += 1;
                tracing::error!(batch_size = size, error = %e, "batch flush failed, records dropped");
            }
        }
        self.batch.clear();
    }

    /// Send a status line if anything was processed since the last one
    ///
    /// The send runs on its own task so a slow chat endpoint never holds up the
    /// queues. A tick that finds the previous send still running is skipped.
    fn report(&mut self) {
        while let Some(result) = self.reports.try_join_next() {
            log_report_panic(result);
        }
        if self.processed <= self.last_reported {
            return;
        }
        if !self.reports.is_empty() {
            tracing::debug!("previous status still in flight, skipping tick");
            return;
        }
        self.last_reported = self.processed;

        let message = self.progress().to_string();
        let notifier = self.notifier.clone();
        self.reports.spawn(async move {
            if let Err(e) = notifier.notify(&message).await {
                tracing::warn!(error = %e, "status notification failed");
            }
        });
    }
}

fn log_report_panic(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::error!(error = %e, "status notification task panicked");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, NotifyError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records the size of every persist call; can fail the first one
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<usize>>,
        fail_first: AtomicBool,
    }

    impl RecordingSink {
        fn failing_first() -> Self {
            Self {
                fail_first: AtomicBool::new(true),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CatalogSink for RecordingSink {
        async fn persist(&self, batch: &[Record]) -> crate::Result<()> {
            self.calls.lock().unwrap().push(batch.len());
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(DatabaseError::TransactionFailed {
                    size: batch.len(),
                    reason: "database is locked".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<(), NotifyError> {
            self.messages.lock().unwrap().push(message.to_string());
            if self.fail {
                return Err(NotifyError::Rejected {
                    status: 429,
                    body: "Too Many Requests".to_string(),
                });
            }
            Ok(())
        }
    }

    fn config(batch_size: usize, report_interval: Duration) -> AggregatorConfig {
        AggregatorConfig {
            batch_size,
            report_interval,
        }
    }

    fn page(page: u32, count: usize) -> PageRecords {
        PageRecords {
            page: PageNumber(page),
            records: (0..count)
                .map(|i| Record {
                    code: format!("{page}-{i}"),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn queues() -> (
        mpsc::Sender<PageRecords>,
        mpsc::Receiver<PageRecords>,
        mpsc::Sender<PageNumber>,
        mpsc::Receiver<PageNumber>,
    ) {
        let (records_tx, records_rx) = mpsc::channel(64);
        let (failed_tx, failed_rx) = mpsc::channel(64);
        (records_tx, records_rx, failed_tx, failed_rx)
    }

    #[tokio::test]
    async fn flushes_at_capacity_then_remainder() {
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
            &config(3, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();

        records_tx.send(page(1, 4)).await.unwrap();
        records_tx.send(page(2, 3)).await.unwrap();
        drop(records_tx);
        drop(failed_tx);

        let summary = aggregator
            .run(records_rx, failed_rx, CancellationToken::new())
            .await;

        assert_eq!(sink.calls(), vec![3, 3, 1]);
        assert_eq!(summary.processed, 7);
        assert_eq!(summary.batches_committed, 3);
        assert_eq!(summary.records_committed, 7);
        assert_eq!(summary.flush_errors, 0);
        assert!(!summary.cancelled);
        assert_eq!(aggregator.state(), AggregatorState::Done);
    }

    #[tokio::test]
    async fn final_flush_runs_once_even_when_empty() {
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
            &config(1000, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();
        records_tx.send(page(1, 0)).await.unwrap();
        drop(records_tx);
        drop(failed_tx);

        let summary = aggregator
            .run(records_rx, failed_rx, CancellationToken::new())
            .await;

        assert_eq!(sink.calls(), vec![0], "exactly one final flush");
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn exact_multiple_of_batch_size_still_gets_final_flush() {
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
            &config(2, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();
        records_tx.send(page(1, 4)).await.unwrap();
        drop(records_tx);
        drop(failed_tx);

        let summary = aggregator
            .run(records_rx, failed_rx, CancellationToken::new())
            .await;

        assert_eq!(sink.calls(), vec![2, 2, 0]);
        assert_eq!(summary.batches_committed, 2);
    }

    #[tokio::test]
    async fn flush_error_is_counted_and_run_continues() {
        let sink = Arc::new(RecordingSink::failing_first());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
            &config(2, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();
        records_tx.send(page(1, 5)).await.unwrap();
        drop(records_tx);
        drop(failed_tx);

        let summary = aggregator
            .run(records_rx, failed_rx, CancellationToken::new())
            .await;

        assert_eq!(sink.calls(), vec![2, 2, 1]);
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.flush_errors, 1);
        assert_eq!(summary.records_committed, 3, "the failed batch is lost");
    }

    #[tokio::test]
    async fn failed_pages_are_counted_and_sorted() {
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink,
            Arc::new(RecordingNotifier::default()),
            &config(10, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();
        for p in [9, 2, 5] {
            failed_tx.send(PageNumber(p)).await.unwrap();
        }
        drop(failed_tx);
        // The records queue outlives the failed queue: Draining, then Done
        records_tx.send(page(1, 1)).await.unwrap();
        drop(records_tx);

        let summary = aggregator
            .run(records_rx, failed_rx, CancellationToken::new())
            .await;

        assert_eq!(
            summary.failed_pages,
            vec![PageNumber(2), PageNumber(5), PageNumber(9)]
        );
        assert_eq!(summary.failed(), 3);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn status_is_sent_only_when_processed_advances() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut aggregator = Aggregator::new(
            Arc::new(RecordingSink::default()),
            notifier.clone(),
            &config(1000, Duration::from_millis(20)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();

        let run = tokio::spawn(async move {
            let summary = aggregator
                .run(records_rx, failed_rx, CancellationToken::new())
                .await;
            (aggregator, summary)
        });

        records_tx.send(page(1, 2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(notifier.messages(), vec!["Processed: 2, Failed: 0"]);

        // A failure alone does not advance `processed`
        failed_tx.send(PageNumber(7)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(notifier.messages().len(), 1);

        records_tx.send(page(2, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            notifier.messages(),
            vec!["Processed: 2, Failed: 0", "Processed: 3, Failed: 1"]
        );

        drop(records_tx);
        drop(failed_tx);
        let (aggregator, summary) = run.await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(aggregator.state(), AggregatorState::Done);
    }

    #[tokio::test]
    async fn notifier_errors_do_not_affect_the_run() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            notifier.clone(),
            &config(1000, Duration::from_millis(10)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();

        let run = tokio::spawn(async move {
            aggregator
                .run(records_rx, failed_rx, CancellationToken::new())
                .await
        });

        records_tx.send(page(1, 3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(records_tx);
        drop(failed_tx);

        let summary = run.await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.records_committed, 3);
        assert!(!notifier.messages().is_empty(), "status was attempted");
    }

    /// Holds every status send until `release` is cancelled
    #[derive(Default)]
    struct StuckNotifier {
        release: CancellationToken,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Notifier for StuckNotifier {
        async fn notify(&self, _message: &str) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stuck_status_send_does_not_block_the_queues() {
        let notifier = Arc::new(StuckNotifier::default());
        let mut aggregator = Aggregator::new(
            Arc::new(RecordingSink::default()),
            notifier.clone(),
            &config(1000, Duration::from_millis(10)),
        );
        let (records_tx, records_rx) = mpsc::channel(1);
        let (failed_tx, failed_rx) = mpsc::channel(1);

        let run = tokio::spawn(async move {
            aggregator
                .run(records_rx, failed_rx, CancellationToken::new())
                .await
        });

        records_tx.send(page(0, 1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while notifier.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("a status send should be in flight");

        tokio::time::timeout(Duration::from_secs(2), async {
            for p in 1..20 {
                records_tx.send(page(p, 1)).await.unwrap();
            }
        })
        .await
        .expect("records queue kept draining while status was stuck");
        assert_eq!(
            notifier.calls.load(Ordering::SeqCst),
            1,
            "ticks are skipped while a send is in flight"
        );

        drop(records_tx);
        drop(failed_tx);
        notifier.release.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run waits only for the released send")
            .unwrap();
        assert_eq!(summary.processed, 20);
    }

    #[tokio::test]
    async fn cancellation_abandons_stuck_status_send() {
        let notifier = Arc::new(StuckNotifier::default());
        let mut aggregator = Aggregator::new(
            Arc::new(RecordingSink::default()),
            notifier.clone(),
            &config(1000, Duration::from_millis(10)),
        );
        let (records_tx, records_rx, _failed_tx, failed_rx) = queues();
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { aggregator.run(records_rx, failed_rx, cancel).await })
        };

        records_tx.send(page(1, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("cancelled run must not wait on the notifier")
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn cancellation_discards_queue_but_flushes_accepted_records() {
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
            &config(1000, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, _failed_tx, failed_rx) = queues();
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { aggregator.run(records_rx, failed_rx, cancel).await })
        };

        records_tx.send(page(1, 2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run must return after cancellation")
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 2);
        assert_eq!(sink.calls(), vec![2]);

        // The receiver was closed, so further sends fail
        assert!(records_tx.send(page(2, 1)).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_before_run_ignores_queued_outcomes() {
        let sink = Arc::new(RecordingSink::default());
        let mut aggregator = Aggregator::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
            &config(1000, Duration::from_secs(60)),
        );
        let (records_tx, records_rx, failed_tx, failed_rx) = queues();
        records_tx.send(page(1, 5)).await.unwrap();
        failed_tx.send(PageNumber(3)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = aggregator.run(records_rx, failed_rx, cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert!(summary.failed_pages.is_empty());
        assert_eq!(sink.calls(), vec![0], "final flush still attempted");
        assert_eq!(aggregator.state(), AggregatorState::Done);
    }
}
