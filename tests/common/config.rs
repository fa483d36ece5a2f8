//! Test configuration helpers pointing the harvester at a mock catalog and a temp database

use catalog_harvest::config::{
    AggregatorConfig, CatalogConfig, PersistenceConfig, PoolConfig, RetryConfig,
};
use catalog_harvest::{Config, PageRange};
use std::path::Path;
use std::time::Duration;
use wiremock::MockServer;

/// Path of the category listing on the mock server
pub const CATALOG_PATH: &str = "/api/category/83";

/// Configuration for a run against `server`, storing into `db_path`
///
/// Retries are immediate so failure scenarios finish quickly.
pub fn test_config(server: &MockServer, db_path: &Path, start: u32, end: u32) -> Config {
    Config {
        catalog: CatalogConfig {
            endpoint: format!("{}{}", server.uri(), CATALOG_PATH),
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
        pages: PageRange::new(start, end),
        pool: PoolConfig {
            concurrency: 4,
            queue_capacity: 16,
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            jitter: false,
            ..Default::default()
        },
        aggregator: AggregatorConfig {
            batch_size: 1000,
            report_interval: Duration::from_secs(60),
        },
        persistence: PersistenceConfig {
            database_path: db_path.to_path_buf(),
        },
        ..Default::default()
    }
}

/// Read the live catalog endpoint from the environment (`.env` is honoured)
///
/// Returns `None` when `CATALOG_LIVE_ENDPOINT` is unset.
pub fn live_endpoint() -> Option<String> {
    dotenvy::dotenv().ok();
    std::env::var("CATALOG_LIVE_ENDPOINT").ok()
}
