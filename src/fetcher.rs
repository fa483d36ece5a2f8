//! Page fetching: one HTTP call per attempt, wrapped in a retry policy.
//!
//! - [`PageSource`]: a single attempt at one page (HTTP in production, fakes in tests)
//! - [`HttpPageSource`]: `GET <endpoint>?currentPage=<n>&pageSize=<size>&...`
//! - [`PageFetcher`]: source + [`RetryPolicy`], always yields a [`FetchOutcome`]

use crate::config::CatalogConfig;
use crate::error::{FetchError, Result};
use crate::parser::parse_page;
use crate::retry::RetryPolicy;
use crate::types::{FetchOutcome, PageNumber, Record};
use std::sync::Arc;

/// One attempt at fetching and parsing a page
///
/// Implementations must not share mutable state between calls; the retry loop
/// treats every call as independent.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch `page` once and return its records in payload order
    async fn fetch(&self, page: PageNumber) -> std::result::Result<Vec<Record>, FetchError>;
}

/// Production [`PageSource`] backed by the catalog HTTP API
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
    endpoint: String,
    page_size: u32,
    query: Vec<(String, String)>,
}

impl HttpPageSource {
    /// Build the HTTP client from the catalog configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the client cannot be built.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        url::Url::parse(&config.endpoint).map_err(|e| {
            crate::Error::config(
                "catalog.endpoint",
                format!("invalid URL '{}': {}", config.endpoint, e),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            page_size: config.page_size,
            query: config.query.clone(),
        })
    }
}

#[async_trait::async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, page: PageNumber) -> std::result::Result<Vec<Record>, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query)
            .query(&[("currentPage", page.0), ("pageSize", self.page_size)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                page,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let payload: serde_json::Value =
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode { page, source })?;

        let records = parse_page(&payload)?;
        tracing::debug!(page = page.0, records = records.len(), "parsed page");
        Ok(records)
    }
}

/// Retrying page fetcher
///
/// Cheap to clone; every fetch task in the pool holds one.
#[derive(Clone)]
pub struct PageFetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    /// Combine a page source with a retry policy
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// The retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `page`, retrying per the policy
    ///
    /// Never fails: exhausting the attempts (or a non-retryable error) yields
    /// [`FetchOutcome::Failure`].
    pub async fn fetch(&self, page: PageNumber) -> FetchOutcome {
        let source = &self.source;
        match self.policy.run(page, |_attempt| source.fetch(page)).await {
            Ok(records) => FetchOutcome::Success { page, records },
            Err(_) => FetchOutcome::Failure { page },
        }
    }
}
