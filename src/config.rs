//! Configuration types for catalog-harvest
//!
//! Every setting has a default, so an empty JSON/TOML document deserializes into a
//! working configuration against the stock catalog endpoint. The core never reads
//! the environment; callers build or deserialize a [`Config`] and hand it over.

use crate::error::{Error, Result};
use crate::types::PageRange;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the harvester
///
/// Fields are organized into logical sub-configs:
/// - [`catalog`](CatalogConfig): endpoint, page size, fixed query parameters
/// - [`pages`](PageRange): the closed page range to fetch
/// - [`pool`](PoolConfig): concurrency ceiling and queue capacity
/// - [`retry`](RetryConfig): per-page attempt limit and backoff
/// - [`aggregator`](AggregatorConfig): batch size and status cadence
/// - [`persistence`](PersistenceConfig): SQLite location
/// - [`notifications`](NotificationConfig): chat-bot progress messages
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Catalog API settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Pages to harvest (inclusive on both ends)
    #[serde(default)]
    pub pages: PageRange,

    /// Fetch pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Per-page retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batching and status reporting
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Progress notifications
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Check the configuration for values the pipeline cannot run with
    ///
    /// Returns the first offending setting as [`Error::Config`] with its key.
    pub fn validate(&self) -> Result<()> {
        if self.pages.start > self.pages.end {
            return Err(Error::config(
                "pages",
                format!(
                    "start page {} is after end page {}",
                    self.pages.start, self.pages.end
                ),
            ));
        }
        if self.pool.concurrency == 0 {
            return Err(Error::config("pool.concurrency", "must be at least 1"));
        }
        if self.pool.concurrency > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::config(
                "pool.concurrency",
                format!("must not exceed {}", tokio::sync::Semaphore::MAX_PERMITS),
            ));
        }
        if self.pool.queue_capacity == 0 {
            return Err(Error::config("pool.queue_capacity", "must be at least 1"));
        }
        if self.catalog.page_size == 0 {
            return Err(Error::config("catalog.page_size", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        if self.aggregator.batch_size == 0 {
            return Err(Error::config("aggregator.batch_size", "must be at least 1"));
        }
        if self.aggregator.report_interval.is_zero() {
            return Err(Error::config(
                "aggregator.report_interval",
                "must be greater than zero",
            ));
        }
        url::Url::parse(&self.catalog.endpoint).map_err(|e| {
            Error::config(
                "catalog.endpoint",
                format!("invalid URL '{}': {}", self.catalog.endpoint, e),
            )
        })?;
        if let Some(telegram) = &self.notifications.telegram {
            if telegram.bot_token.is_empty() {
                return Err(Error::config(
                    "notifications.telegram.bot_token",
                    "must not be empty",
                ));
            }
            url::Url::parse(&telegram.api_base).map_err(|e| {
                Error::config(
                    "notifications.telegram.api_base",
                    format!("invalid URL '{}': {}", telegram.api_base, e),
                )
            })?;
        }
        Ok(())
    }
}

/// Catalog API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Category listing endpoint (without query string)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Records requested per page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Fixed query parameters sent with every page request
    ///
    /// `currentPage` and `pageSize` are always added by the fetcher.
    #[serde(default = "default_query")]
    pub query: Vec<(String, String)>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            page_size: default_page_size(),
            query: default_query(),
            timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Fetch pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum pages fetched concurrently (default: 50)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Capacity of the records queue between pool and aggregator, in pages (default: 1000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Retry configuration for page fetches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per page, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 250 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 5 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Aggregator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Records per transactional flush (default: 1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between status notifications (default: 10 seconds)
    #[serde(default = "default_report_interval", with = "duration_serde")]
    pub report_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            report_interval: default_report_interval(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite database (default: "catalog-harvest.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Notification configuration
///
/// With no chat-bot configured, status messages are discarded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Telegram bot settings
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Telegram bot configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    pub bot_token: String,

    /// Target chat identifier
    pub chat_id: String,

    /// Bot API base URL (default: "https://api.telegram.org")
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Timeout for a single send (default: 10 seconds)
    #[serde(default = "default_notify_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Minimum spacing between delivered messages (default: 1 second)
    #[serde(default = "default_min_interval", with = "duration_ms_serde")]
    pub min_interval: Duration,
}

// Default value functions
fn default_endpoint() -> String {
    "https://www.ajio.com/api/category/83".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_query() -> Vec<(String, String)> {
    [
        ("fields", "SITE"),
        ("format", "json"),
        ("query", ":newn"),
        ("sortBy", "newn"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("catalog-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_concurrency() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    1000
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("catalog-harvest.db")
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_min_interval() -> Duration {
    Duration::from_secs(1)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second delays)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
