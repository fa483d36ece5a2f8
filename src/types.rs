//! Core types for catalog-harvest

use serde::{Deserialize, Serialize};

/// Index of one page of remote pagination
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageNumber(pub u32);

impl PageNumber {
    /// Create a new PageNumber
    pub fn new(page: u32) -> Self {
        Self(page)
    }

    /// Get the inner u32 value
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PageNumber {
    fn from(page: u32) -> Self {
        Self(page)
    }
}

impl From<PageNumber> for u32 {
    fn from(page: PageNumber) -> Self {
        page.0
    }
}

impl PartialEq<u32> for PageNumber {
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for PageNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed range of pages `[start, end]` to harvest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    /// First page (inclusive)
    pub start: u32,
    /// Last page (inclusive)
    pub end: u32,
}

impl PageRange {
    /// Create a new page range
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of pages in the range (0 if `start > end`)
    pub fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// Whether the range contains no pages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `page` falls inside the range
    pub fn contains(&self, page: PageNumber) -> bool {
        (self.start..=self.end).contains(&page.0)
    }

    /// Iterate every page number in ascending order
    pub fn pages(self) -> impl Iterator<Item = PageNumber> {
        (self.start..=self.end).map(PageNumber)
    }
}

impl Default for PageRange {
    fn default() -> Self {
        Self {
            start: 0,
            end: 23_400,
        }
    }
}

/// A normalized catalog entry
///
/// Produced by the record parser; missing source fields are empty strings or `0.0`.
/// Column names match the `products` table so rows decode straight into this type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Record {
    /// Business key (unique per product)
    pub code: String,
    /// Display name
    pub name: String,
    /// Brand name
    pub brand_name: String,
    /// Brand classification (e.g. private label vs. marketplace)
    pub brand_type: String,
    /// Color group
    pub color_group: String,
    /// Top level of the category hierarchy
    pub segment: String,
    /// Middle level of the category hierarchy
    pub vertical: String,
    /// Leaf level of the category hierarchy
    pub brick: String,
    /// Primary image reference
    pub image_url: String,
    /// List price
    pub price: f64,
    /// Discounted-from ("was") price
    pub was_price: f64,
    /// Offer price
    pub offer_price: f64,
    /// Detail page reference
    pub url: String,
}

/// Result of fetching one page after all retry attempts
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// Page fetched and parsed; `records` may be empty past the last real page
    Success {
        /// The page that was fetched
        page: PageNumber,
        /// Records in source payload order
        records: Vec<Record>,
    },
    /// Every attempt failed
    Failure {
        /// The page that could not be fetched
        page: PageNumber,
    },
}

impl FetchOutcome {
    /// The page this outcome belongs to
    pub fn page(&self) -> PageNumber {
        match self {
            FetchOutcome::Success { page, .. } | FetchOutcome::Failure { page } => *page,
        }
    }

    /// Whether this outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// Point-in-time view of the aggregator's progress counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Records received so far
    pub processed: u64,
    /// Pages that failed terminally so far
    pub failed: u64,
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Processed: {}, Failed: {}", self.processed, self.failed)
    }
}

/// Final report of one harvest run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Records received by the aggregator
    pub processed: u64,
    /// Pages that exhausted their retries, sorted ascending
    pub failed_pages: Vec<PageNumber>,
    /// Batches committed successfully
    pub batches_committed: u64,
    /// Records included in committed batches
    pub records_committed: u64,
    /// Batches whose transaction failed (their records are lost)
    pub flush_errors: u64,
    /// Whether the run was stopped by cancellation
    pub cancelled: bool,
}

impl RunSummary {
    /// Number of pages that failed terminally
    pub fn failed(&self) -> u64 {
        self.failed_pages.len() as u64
    }

    /// Final counters in the same shape as the periodic status
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed,
            failed: self.failed(),
        }
    }
}
