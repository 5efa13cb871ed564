// Ingestion orchestrator.
//
// Walks listing pages one at a time: scrape, dedup against the relational
// store, capture and upload artifacts for unseen posts, insert their rows,
// then follow the next-page link. Pagination is a loop over a mutable
// "next" link. Per-post failures are skipped; a failed dedup query or a
// page that did not fully ingest ends the crawl.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use redarchive_common::{json_path, screenshot_path, IngestConfig, Post};
use redarchive_store::{BlobStore, PostStore, UploadOptions};

use crate::traits::{ArtifactExtractor, Credentials, ListingScraper, OperatorGate};

const SCREENSHOT_CONTENT_TYPE: &str = "image/png";
const JSON_CONTENT_TYPE: &str = "application/json";
const LOGIN_PROMPT: &str = "Logged in. Clear any captcha or two-factor challenge, then confirm";

/// Why a crawl stopped before running out of pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    ScrapeFailed { url: String, error: String },
    DedupFailed { url: String, error: String },
    IncompletePage {
        url: String,
        expected: usize,
        ingested: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The last page had no next link.
    Exhausted,
    /// A page held no unseen posts; everything older is already stored.
    CaughtUp,
    PageLimit,
    /// The next link pointed at a page already visited in this run.
    Cycle { url: String },
    Aborted(AbortReason),
}

impl CrawlOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, CrawlOutcome::Aborted(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub pages: usize,
    pub posts_seen: usize,
    pub already_stored: usize,
    pub ingested: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
    pub outcome: CrawlOutcome,
}

impl IngestReport {
    fn new() -> Self {
        Self {
            pages: 0,
            posts_seen: 0,
            already_stored: 0,
            ingested: Vec::new(),
            failed: Vec::new(),
            outcome: CrawlOutcome::Exhausted,
        }
    }
}

enum PageResult {
    Next(Option<String>),
    Stop(CrawlOutcome),
}

pub struct Ingestor<'a> {
    scraper: &'a dyn ListingScraper,
    extractor: &'a dyn ArtifactExtractor,
    blobs: &'a dyn BlobStore,
    store: &'a dyn PostStore,
    gate: &'a dyn OperatorGate,
    config: &'a IngestConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        scraper: &'a dyn ListingScraper,
        extractor: &'a dyn ArtifactExtractor,
        blobs: &'a dyn BlobStore,
        store: &'a dyn PostStore,
        gate: &'a dyn OperatorGate,
        config: &'a IngestConfig,
    ) -> Self {
        Self {
            scraper,
            extractor,
            blobs,
            store,
            gate,
            config,
        }
    }

    /// Crawl from `start_url`. Returns `Err` only when the crawl could not
    /// start (login or operator confirmation failed); every other stop is
    /// reported through `IngestReport::outcome`.
    pub async fn run(&self, start_url: &str, login: bool) -> Result<IngestReport> {
        if login {
            self.login().await?;
        }

        let mut report = IngestReport::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut next = Some(start_url.to_string());

        report.outcome = loop {
            let Some(url) = next.take() else {
                info!(pages = report.pages, "No next page, crawl complete");
                break CrawlOutcome::Exhausted;
            };

            if self.config.max_pages.is_some_and(|max| report.pages >= max) {
                info!(pages = report.pages, "Page limit reached");
                break CrawlOutcome::PageLimit;
            }
            if !visited.insert(url.clone()) {
                warn!(url, "Next link already visited, stopping");
                break CrawlOutcome::Cycle { url };
            }

            if report.pages > 0 {
                self.config.page_delay.pause().await;
            }
            report.pages += 1;

            match self.ingest_page(&url, &mut report).await {
                PageResult::Next(link) => next = link,
                PageResult::Stop(outcome) => break outcome,
            }
        };

        info!(
            pages = report.pages,
            seen = report.posts_seen,
            already_stored = report.already_stored,
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            outcome = ?report.outcome,
            "Crawl finished"
        );
        Ok(report)
    }

    async fn login(&self) -> Result<()> {
        if !self.config.has_credentials() {
            bail!("REDDIT_USERNAME and REDDIT_PASSWORD are required to log in");
        }
        let credentials = Credentials {
            username: self.config.reddit_username.clone(),
            password: self.config.reddit_password.clone(),
        };
        self.scraper
            .login(&credentials)
            .await
            .context("Login failed")?;
        self.gate
            .confirm(LOGIN_PROMPT)
            .await
            .context("Operator did not confirm login")?;
        Ok(())
    }

    async fn ingest_page(&self, url: &str, report: &mut IngestReport) -> PageResult {
        // --- ScrapingPage ---
        let page = match self.scraper.scrape_page(url).await {
            Ok(page) => page,
            Err(e) => {
                error!(url, "Failed to scrape listing page: {e:#}");
                return PageResult::Stop(CrawlOutcome::Aborted(AbortReason::ScrapeFailed {
                    url: url.to_string(),
                    error: format!("{e:#}"),
                }));
            }
        };

        let mut page_ids = HashSet::new();
        let posts: Vec<Post> = page
            .entries
            .iter()
            .map(Post::from_listing)
            .filter(|post| page_ids.insert(post.id))
            .collect();
        report.posts_seen += posts.len();
        info!(url, posts = posts.len(), "Found posts on page");

        // --- Deduplicating ---
        let ids: Vec<Uuid> = posts.iter().map(|p| p.id).collect();
        let existing = match self.store.existing_ids(&ids).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(url, error = %e, "Existing-post query failed, aborting crawl");
                return PageResult::Stop(CrawlOutcome::Aborted(AbortReason::DedupFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                }));
            }
        };

        let unique: Vec<Post> = posts
            .into_iter()
            .filter(|p| !existing.contains(&p.id))
            .collect();
        report.already_stored += existing.len();
        info!(url, unique = unique.len(), already_stored = existing.len(), "Deduplicated page");

        if unique.is_empty() {
            info!(url, "No unseen posts on page, caught up");
            return PageResult::Stop(CrawlOutcome::CaughtUp);
        }

        // --- ExtractingArtifacts / Uploading / Persisting ---
        let mut ingested = 0;
        for post in unique.iter() {
            match self.ingest_post(post.clone()).await {
                Ok(()) => {
                    ingested += 1;
                    report.ingested.push(post.id);
                }
                Err(e) => {
                    warn!(post_id = %post.id, url = post.fields.url.as_str(), "Skipping post: {e:#}");
                    report.failed.push((post.id, format!("{e:#}")));
                }
            }
        }

        if ingested != unique.len() {
            error!(
                url,
                expected = unique.len(),
                ingested,
                "Not every unseen post on the page was ingested, stopping crawl"
            );
            return PageResult::Stop(CrawlOutcome::Aborted(AbortReason::IncompletePage {
                url: url.to_string(),
                expected: unique.len(),
                ingested,
            }));
        }

        // --- Recursing ---
        PageResult::Next(page.next_page)
    }

    async fn ingest_post(&self, mut post: Post) -> Result<()> {
        let url = post.fields.url.clone();

        let screenshot = self
            .extractor
            .capture_screenshot(&url)
            .await
            .context("Screenshot capture failed")?;
        let raw_json = self
            .extractor
            .capture_raw_json(&url)
            .await
            .context("Raw JSON capture failed")?;

        let screenshot_target = post
            .fields
            .screenshot_path
            .clone()
            .unwrap_or_else(|| screenshot_path(post.id));
        let json_target = post
            .fields
            .json_file_path
            .clone()
            .unwrap_or_else(|| json_path(post.id));

        let stored_screenshot = self
            .upload(screenshot, &screenshot_target, SCREENSHOT_CONTENT_TYPE)
            .await
            .context("Screenshot upload failed")?;
        let stored_json = self
            .upload(raw_json, &json_target, JSON_CONTENT_TYPE)
            .await
            .context("Raw JSON upload failed")?;

        post.fields.screenshot_path = Some(stored_screenshot);
        post.fields.json_file_path = Some(stored_json);

        self.store
            .insert_post(&post)
            .await
            .context("Post insert failed")?;
        info!(post_id = %post.id, "Ingested post");
        Ok(())
    }

    async fn upload(&self, bytes: Bytes, path: &str, content_type: &str) -> Result<String> {
        let stored = self
            .blobs
            .upload(
                bytes,
                &self.config.root_dir_name,
                path,
                &UploadOptions::content_type(content_type),
            )
            .await?;
        Ok(stored)
    }
}
