//! # catalog-harvest
//!
//! Concurrent harvester for paginated catalog APIs with a transactional price trail.
//!
//! ## Pipeline
//!
//! ```text
//!   PageRange ──► FetchPool ──(records)──► Aggregator ──► CatalogSink (SQLite)
//!                 C permits  ──(failed)───►     │
//!                                               └──(every tick)──► Notifier
//! ```
//!
//! - The [`FetchPool`] starts one task per page behind a semaphore of `C` permits;
//!   every task runs a [`PageFetcher`] (one [`PageSource`] call per attempt, up to the
//!   retry limit) and queues a single outcome.
//! - The [`Aggregator`] multiplexes both queues and a timer, batches records and
//!   flushes each batch in one transaction: current-state upsert plus history append.
//! - Page failures, flush failures and notification failures never stop a run; they
//!   show up in the [`RunSummary`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_harvest::{Config, Harvester, PageRange};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         pages: PageRange::new(0, 50),
//!         ..Default::default()
//!     };
//!
//!     let harvester = Harvester::from_config(config).await?;
//!     let summary = harvester.run(CancellationToken::new()).await?;
//!
//!     println!("processed {} records", summary.processed);
//!     println!("failed pages: {:?}", summary.failed_pages);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batching consumer of fetch results
pub mod aggregator;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Page sources and the retrying fetcher
pub mod fetcher;
/// Progress notifications
pub mod notifier;
/// Record parser
pub mod parser;
/// Run orchestration and signal handling
pub mod pipeline;
/// Bounded-concurrency fetch pool
pub mod pool;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use aggregator::{Aggregator, AggregatorState};
pub use config::Config;
pub use db::{CatalogSink, Database, HistoryRow};
pub use error::{DatabaseError, Error, FetchError, MalformedPageError, NotifyError, Result};
pub use fetcher::{HttpPageSource, PageFetcher, PageSource};
pub use notifier::{NoOpNotifier, Notifier, RateLimitedNotifier, TelegramNotifier};
pub use pipeline::{Harvester, cancel_on_shutdown_signal};
pub use pool::{FetchPool, PageRecords, PoolHandle, PoolReport};
pub use retry::RetryPolicy;
pub use types::{FetchOutcome, PageNumber, PageRange, ProgressSnapshot, Record, RunSummary};
