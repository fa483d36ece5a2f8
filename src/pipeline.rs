//! Harvest pipeline: pool and aggregator wired together for one run.

use crate::aggregator::Aggregator;
use crate::config::{AggregatorConfig, Config};
use crate::db::{CatalogSink, Database};
use crate::error::{Error, Result};
use crate::fetcher::{HttpPageSource, PageFetcher, PageSource};
use crate::notifier::{self, Notifier};
use crate::pool::FetchPool;
use crate::retry::RetryPolicy;
use crate::types::{PageRange, RunSummary};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sent before the first page is dispatched
pub const STARTED_MESSAGE: &str = "Started fetching records";

/// One configured harvest
///
/// A `Harvester` can be run more than once; every run re-fetches the whole range.
pub struct Harvester {
    pages: PageRange,
    pool: FetchPool,
    sink: Arc<dyn CatalogSink>,
    notifier: Arc<dyn Notifier>,
    aggregator: AggregatorConfig,
    database: Option<Arc<Database>>,
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("pages", &self.pages)
            .field("pool", &self.pool)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

impl Harvester {
    /// Assemble a harvester from explicit collaborators
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn new(
        config: &Config,
        source: Arc<dyn PageSource>,
        sink: Arc<dyn CatalogSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;

        let fetcher = PageFetcher::new(source, RetryPolicy::from_config(&config.retry));
        let pool = FetchPool::new(fetcher, config.pool.concurrency, config.pool.queue_capacity);

        Ok(Self {
            pages: config.pages,
            pool,
            sink,
            notifier,
            aggregator: config.aggregator.clone(),
            database: None,
        })
    }

    /// Build the production harvester: HTTP source, SQLite sink, configured notifier
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the HTTP client cannot be built or the
    /// database cannot be opened and migrated.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let source = Arc::new(HttpPageSource::new(&config.catalog)?);
        let database = Arc::new(Database::new(&config.persistence.database_path).await?);
        let notifier = notifier::from_config(&config.notifications)?;

        tracing::info!(
            database = %config.persistence.database_path.display(),
            endpoint = %config.catalog.endpoint,
            "harvester ready"
        );

        let mut harvester = Self::new(&config, source, database.clone(), notifier)?;
        harvester.database = Some(database);
        Ok(harvester)
    }

    /// The SQLite database, when built with [`Harvester::from_config`]
    pub fn database(&self) -> Option<&Arc<Database>> {
        self.database.as_ref()
    }

    /// Pages this harvester fetches
    pub fn pages(&self) -> PageRange {
        self.pages
    }

    /// Fetch the whole range, persist it and report progress
    ///
    /// Page failures, flush failures and notification failures are all reflected
    /// in the returned summary rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`] if the pool supervisor task panicked.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        self.announce(STARTED_MESSAGE).await;

        let handle = self.pool.spawn(self.pages, cancel.clone());
        let mut aggregator =
            Aggregator::new(self.sink.clone(), self.notifier.clone(), &self.aggregator);
        let summary = aggregator
            .run(handle.records, handle.failed, cancel)
            .await;

        let report = handle
            .task
            .await
            .map_err(|e| Error::Pool(e.to_string()))?;
        tracing::debug!(
            dispatched = report.dispatched,
            cancelled = report.cancelled,
            "fetch pool joined"
        );

        let verb = if summary.cancelled {
            "Cancelled"
        } else {
            "Completed"
        };
        self.announce(&format!("{verb} fetching records. {}", summary.progress()))
            .await;

        Ok(summary)
    }

    async fn announce(&self, message: &str) {
        tracing::info!(message, "harvest status");
        if let Err(e) = self.notifier.notify(message).await {
            tracing::warn!(error = %e, "lifecycle notification failed");
        }
    }
}

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The listener exits quietly if the token is cancelled by someone else first. A
/// listener that cannot hook any signal waits forever rather than cancelling.
///
/// # Example
///
/// ```no_run
/// use catalog_harvest::{Config, Harvester, cancel_on_shutdown_signal};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::from_config(Config::default()).await?;
///
///     let cancel = CancellationToken::new();
///     cancel_on_shutdown_signal(cancel.clone());
///
///     let summary = harvester.run(cancel).await?;
///     println!("{} records, {} failed pages", summary.processed, summary.failed());
///     Ok(())
/// }
/// ```
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("shutdown signal received, cancelling harvest");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in sandboxes; fall back to the portable Ctrl+C hook
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "termination signal received");
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "unix signal handlers unavailable, listening for Ctrl+C");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

/// Resolves on Ctrl+C; never resolves if the hook cannot be installed
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "termination signal received"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for Ctrl+C, shutdown signal disabled");
            std::future::pending::<()>().await;
        }
    }
}
