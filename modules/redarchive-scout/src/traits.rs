// Trait seams for the ingestion pipeline.
//
// ListingScraper and ArtifactExtractor front the live site (the Browserless
// session in production). MediaFetcher fetches plain HTTP resources such as
// DASH manifests and segments. OperatorGate is the human-in-the-loop pause
// after login. Mocks for all four live in `testing`.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use redarchive_common::ListingEntry;

use crate::error::ExtractError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One scraped listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,
    /// Absolute URL of the next page, if the page links one.
    pub next_page: Option<String>,
}

// ---------------------------------------------------------------------------
// ListingScraper
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ListingScraper: Send + Sync {
    /// Establish a logged-in session. Called at most once per crawl.
    async fn login(&self, credentials: &Credentials) -> Result<()>;

    async fn scrape_page(&self, url: &str) -> Result<ListingPage>;
}

// ---------------------------------------------------------------------------
// ArtifactExtractor
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ArtifactExtractor: Send + Sync {
    async fn capture_screenshot(&self, url: &str) -> std::result::Result<Bytes, ExtractError>;

    /// The post's raw `.json` document.
    async fn capture_raw_json(&self, url: &str) -> std::result::Result<Bytes, ExtractError>;
}

// ---------------------------------------------------------------------------
// MediaFetcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

// ---------------------------------------------------------------------------
// OperatorGate
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OperatorGate: Send + Sync {
    /// Block until an operator confirms. An error aborts the crawl.
    async fn confirm(&self, prompt: &str) -> Result<()>;
}
