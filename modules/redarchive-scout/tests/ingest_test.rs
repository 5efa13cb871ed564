//! Orchestrator scenarios against the in-process mocks.
//!
//! Pages, artifacts, blobs and rows are all deterministic, so each test
//! asserts exactly which posts were captured, uploaded and inserted.

use std::collections::HashSet;

use redarchive_common::{json_path, screenshot_path, IngestConfig, ListingEntry, Post};
use redarchive_scout::ingest::{AbortReason, CrawlOutcome, Ingestor};
use redarchive_scout::testing::{
    listing_entry, listing_page, post_url, test_config, AutoConfirmGate, MemoryPostStore,
    MockBlobStore, MockExtractor, MockScraper, CONTAINER,
};
use redarchive_store::PostStore;

const PAGE_1: &str = "https://old.reddit.com/r/test/new/";
const PAGE_2: &str = "https://old.reddit.com/r/test/new/?count=25&after=t3_e";
const PAGE_3: &str = "https://old.reddit.com/r/test/new/?count=50&after=t3_f";

struct Fixture {
    a: ListingEntry,
    b: ListingEntry,
    c: ListingEntry,
    d: ListingEntry,
    e: ListingEntry,
}

fn fixture() -> Fixture {
    Fixture {
        a: listing_entry("thing_t3_a", "image"),
        b: listing_entry("thing_t3_b", "image"),
        c: listing_entry("thing_t3_c", "self"),
        d: listing_entry("thing_t3_d", "video"),
        e: listing_entry("thing_t3_e", "image"),
    }
}

/// Store already holding A, B and C.
fn seeded_store(f: &Fixture) -> MemoryPostStore {
    MemoryPostStore::new()
        .with_post(Post::from_listing(&f.a))
        .with_post(Post::from_listing(&f.b))
        .with_post(Post::from_listing(&f.c))
}

async fn crawl(
    scraper: &MockScraper,
    extractor: &MockExtractor,
    blobs: &MockBlobStore,
    store: &MemoryPostStore,
    gate: &AutoConfirmGate,
    config: &IngestConfig,
    login: bool,
) -> redarchive_scout::ingest::IngestReport {
    Ingestor::new(scraper, extractor, blobs, store, gate, config)
        .run(PAGE_1, login)
        .await
        .unwrap()
}

#[tokio::test]
async fn existing_ids_reports_only_stored_posts() {
    let f = fixture();
    let store = seeded_store(&f);
    let (a, b, d) = (
        Post::from_listing(&f.a).id,
        Post::from_listing(&f.b).id,
        Post::from_listing(&f.d).id,
    );

    let existing = store.existing_ids(&[a, b, d]).await.unwrap();
    assert_eq!(existing, HashSet::from([a, b]));
}

#[tokio::test]
async fn stored_posts_are_skipped_entirely() {
    let f = fixture();
    let store = seeded_store(&f);
    let scraper = MockScraper::new()
        .on_page(
            PAGE_1,
            listing_page(vec![f.b.clone(), f.d.clone(), f.e.clone()], Some(PAGE_2)),
        )
        .on_page(PAGE_2, listing_page(vec![f.a.clone()], Some(PAGE_3)));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;

    let (b, d, e) = (
        Post::from_listing(&f.b).id,
        Post::from_listing(&f.d).id,
        Post::from_listing(&f.e).id,
    );
    assert_eq!(report.ingested, vec![d, e]);
    assert_eq!(report.already_stored, 2);
    assert_eq!(store.post_count(), 5);

    // B never reached the extractor or the blob store.
    assert!(!extractor.captured().contains(&post_url(&f.b)));
    assert!(blobs.uploads_under(&b.to_string()).is_empty());
    assert_eq!(
        blobs.uploads(),
        vec![screenshot_path(d), json_path(d), screenshot_path(e), json_path(e)]
    );

    // Page 2 held nothing new, so the crawl stopped there.
    assert_eq!(report.outcome, CrawlOutcome::CaughtUp);
    assert_eq!(scraper.scraped(), vec![PAGE_1, PAGE_2]);
}

#[tokio::test]
async fn ingested_post_points_at_uploaded_blobs() {
    let f = fixture();
    let store = MemoryPostStore::new();
    let scraper = MockScraper::new().on_page(PAGE_1, listing_page(vec![f.d.clone()], None));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;
    assert_eq!(report.outcome, CrawlOutcome::Exhausted);

    let id = Post::from_listing(&f.d).id;
    let post = store.post(id).unwrap();
    assert_eq!(post.fields.screenshot_path, Some(screenshot_path(id)));
    assert_eq!(post.fields.json_file_path, Some(json_path(id)));
    assert_eq!(post.fields.static_files.len(), 1);

    let screenshot = blobs.get(CONTAINER, &screenshot_path(id)).unwrap();
    assert_eq!(screenshot.content_type.as_deref(), Some("image/png"));
    let json = blobs.get(CONTAINER, &json_path(id)).unwrap();
    assert_eq!(json.content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn failed_upload_stops_the_crawl() {
    let f = fixture();
    let store = seeded_store(&f);
    let e = Post::from_listing(&f.e).id;
    let scraper = MockScraper::new()
        .on_page(
            PAGE_1,
            listing_page(vec![f.b.clone(), f.d.clone(), f.e.clone()], Some(PAGE_2)),
        )
        .on_page(PAGE_2, listing_page(vec![listing_entry("thing_t3_f", "image")], None));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new().failing_upload(&screenshot_path(e));
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;

    assert!(!store.has_post(e));
    assert!(blobs.uploads_under(&e.to_string()).is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, e);
    assert_eq!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::IncompletePage {
            url: PAGE_1.to_string(),
            expected: 2,
            ingested: 1,
        })
    );
    assert_eq!(scraper.scraped(), vec![PAGE_1]);
}

#[tokio::test]
async fn capture_failure_skips_post_without_uploads() {
    let f = fixture();
    let store = MemoryPostStore::new();
    let scraper = MockScraper::new().on_page(
        PAGE_1,
        listing_page(vec![f.d.clone(), f.e.clone()], Some(PAGE_2)),
    );
    let extractor = MockExtractor::new().failing_json(&post_url(&f.d));
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;

    let (d, e) = (Post::from_listing(&f.d).id, Post::from_listing(&f.e).id);
    assert!(!store.has_post(d));
    assert!(store.has_post(e));
    assert!(blobs.uploads_under(&d.to_string()).is_empty());
    assert!(report.outcome.is_aborted());
}

#[tokio::test]
async fn failed_insert_leaves_no_row_and_aborts() {
    let f = fixture();
    let d = Post::from_listing(&f.d).id;
    let store = MemoryPostStore::new().failing_insert(d);
    let scraper = MockScraper::new().on_page(PAGE_1, listing_page(vec![f.d.clone()], Some(PAGE_2)));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;

    assert_eq!(store.post_count(), 0);
    assert!(matches!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::IncompletePage { ingested: 0, .. })
    ));
}

#[tokio::test]
async fn dedup_failure_aborts_before_any_capture() {
    let f = fixture();
    let store = MemoryPostStore::new().failing_existing_ids();
    let scraper = MockScraper::new().on_page(PAGE_1, listing_page(vec![f.d.clone()], Some(PAGE_2)));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;

    assert!(matches!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::DedupFailed { .. })
    ));
    assert!(extractor.captured().is_empty());
    assert!(blobs.uploads().is_empty());
    assert_eq!(scraper.scraped(), vec![PAGE_1]);
}

#[tokio::test]
async fn scrape_failure_aborts() {
    let scraper = MockScraper::new();
    let store = MemoryPostStore::new();
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;
    assert!(matches!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::ScrapeFailed { .. })
    ));
    assert_eq!(report.pages, 1);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let f = fixture();
    let store = MemoryPostStore::new();
    let scraper = MockScraper::new().on_page(
        PAGE_1,
        listing_page(vec![f.d.clone(), f.e.clone()], None),
    );
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let first = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;
    assert_eq!(first.ingested.len(), 2);
    let uploads_after_first = blobs.uploads().len();

    let second = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;
    assert!(second.ingested.is_empty());
    assert_eq!(second.outcome, CrawlOutcome::CaughtUp);
    assert_eq!(store.post_count(), 2);
    assert_eq!(blobs.uploads().len(), uploads_after_first);
}

#[tokio::test]
async fn next_link_cycle_is_detected() {
    let f = fixture();
    let store = MemoryPostStore::new();
    let scraper = MockScraper::new()
        .on_page(PAGE_1, listing_page(vec![f.d.clone()], Some(PAGE_2)))
        .on_page(PAGE_2, listing_page(vec![f.e.clone()], Some(PAGE_1)));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;
    assert_eq!(
        report.outcome,
        CrawlOutcome::Cycle {
            url: PAGE_1.to_string()
        }
    );
    assert_eq!(report.ingested.len(), 2);
}

#[tokio::test]
async fn page_limit_is_honoured() {
    let f = fixture();
    let store = MemoryPostStore::new();
    let scraper = MockScraper::new()
        .on_page(PAGE_1, listing_page(vec![f.d.clone()], Some(PAGE_2)))
        .on_page(PAGE_2, listing_page(vec![f.e.clone()], Some(PAGE_3)));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = IngestConfig {
        max_pages: Some(1),
        ..test_config()
    };

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, false).await;
    assert_eq!(report.outcome, CrawlOutcome::PageLimit);
    assert_eq!(scraper.scraped(), vec![PAGE_1]);
}

#[tokio::test]
async fn login_runs_once_and_waits_for_operator() {
    let f = fixture();
    let store = MemoryPostStore::new();
    let scraper = MockScraper::new()
        .on_page(PAGE_1, listing_page(vec![f.d.clone()], Some(PAGE_2)))
        .on_page(PAGE_2, listing_page(vec![f.e.clone()], None));
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = test_config();

    let report = crawl(&scraper, &extractor, &blobs, &store, &gate, &config, true).await;
    assert_eq!(report.outcome, CrawlOutcome::Exhausted);
    assert_eq!(scraper.logins(), 1);
    assert_eq!(gate.prompts(), 1);
}

#[tokio::test]
async fn refused_confirmation_fails_before_scraping() {
    let scraper = MockScraper::new();
    let store = MemoryPostStore::new();
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::refusing();
    let config = test_config();

    let result = Ingestor::new(&scraper, &extractor, &blobs, &store, &gate, &config)
        .run(PAGE_1, true)
        .await;
    assert!(result.is_err());
    assert!(scraper.scraped().is_empty());
}

#[tokio::test]
async fn login_requires_credentials() {
    let scraper = MockScraper::new();
    let store = MemoryPostStore::new();
    let extractor = MockExtractor::new();
    let blobs = MockBlobStore::new();
    let gate = AutoConfirmGate::new();
    let config = IngestConfig {
        reddit_password: String::new(),
        ..test_config()
    };

    let result = Ingestor::new(&scraper, &extractor, &blobs, &store, &gate, &config)
        .run(PAGE_1, true)
        .await;
    assert!(result.is_err());
    assert_eq!(scraper.logins(), 0);
}
