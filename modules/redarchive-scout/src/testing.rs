// Test mocks for the archival pipeline.
//
// One mock per trait boundary:
// - MockScraper (ListingScraper): URL -> ListingPage, records scrape order
// - MockExtractor (ArtifactExtractor): deterministic artifacts, per-URL failures
// - MockBlobStore (BlobStore): in-memory blobs, per-path upload failures
// - MemoryPostStore (PostStore): stateful in-memory source/content/labels
// - MockMediaFetcher (MediaFetcher): URL -> bytes
// - AutoConfirmGate (OperatorGate): confirms (or refuses) immediately
//
// Plus helpers for listing entries, raw post JSON and a no-delay config.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use uuid::Uuid;

use redarchive_common::{
    BlobBackend, ContentRecord, DbEngine, IngestConfig, ListingEntry, Politeness, Post,
    PostWithLabel, SourceType, SpatialLabel, StaticFileType,
};
use redarchive_store::{BlobError, BlobStore, PostStore, StoreError, UploadOptions};

use crate::error::ExtractError;
use crate::traits::{
    ArtifactExtractor, Credentials, ListingPage, ListingScraper, MediaFetcher, OperatorGate,
};

pub const CONTAINER: &str = "reddit-posts";

// ---------------------------------------------------------------------------
// MockScraper
// ---------------------------------------------------------------------------

/// HashMap-based listing scraper. Returns `Err` for unregistered URLs.
pub struct MockScraper {
    pages: HashMap<String, ListingPage>,
    scraped: Mutex<Vec<String>>,
    logins: AtomicUsize,
    reject_login: bool,
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            scraped: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            reject_login: false,
        }
    }

    pub fn on_page(mut self, url: &str, page: ListingPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    /// URLs scraped so far, in order.
    pub fn scraped(&self) -> Vec<String> {
        self.scraped.lock().unwrap().clone()
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingScraper for MockScraper {
    async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.reject_login {
            bail!("MockScraper: login rejected for {}", credentials.username);
        }
        Ok(())
    }

    async fn scrape_page(&self, url: &str) -> Result<ListingPage> {
        self.scraped.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("MockScraper: no page registered for {url}"))
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Serves a deterministic screenshot and JSON document for any URL unless
/// the URL was registered as failing.
pub struct MockExtractor {
    json: HashMap<String, Bytes>,
    failing_screenshots: HashSet<String>,
    failing_json: HashSet<String>,
    captured: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            json: HashMap::new(),
            failing_screenshots: HashSet::new(),
            failing_json: HashSet::new(),
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn on_json(mut self, url: &str, document: &Value) -> Self {
        self.json
            .insert(url.to_string(), Bytes::from(document.to_string()));
        self
    }

    pub fn failing_screenshot(mut self, url: &str) -> Self {
        self.failing_screenshots.insert(url.to_string());
        self
    }

    pub fn failing_json(mut self, url: &str) -> Self {
        self.failing_json.insert(url.to_string());
        self
    }

    /// URLs any artifact was requested for, in order (one entry per call).
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactExtractor for MockExtractor {
    async fn capture_screenshot(&self, url: &str) -> std::result::Result<Bytes, ExtractError> {
        self.captured.lock().unwrap().push(url.to_string());
        if self.failing_screenshots.contains(url) {
            return Err(ExtractError::Empty {
                what: "screenshot",
                url: url.to_string(),
            });
        }
        Ok(Bytes::from(format!("png:{url}")))
    }

    async fn capture_raw_json(&self, url: &str) -> std::result::Result<Bytes, ExtractError> {
        self.captured.lock().unwrap().push(url.to_string());
        if self.failing_json.contains(url) {
            return Err(ExtractError::Empty {
                what: "post json",
                url: url.to_string(),
            });
        }
        Ok(self
            .json
            .get(url)
            .cloned()
            .unwrap_or_else(|| Bytes::from(json!({ "url": url }).to_string())))
    }
}

// ---------------------------------------------------------------------------
// MockBlobStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// In-memory blob store keyed by `(container, path)`. Uploads to a path
/// registered with `failing_upload` return a transport error.
pub struct MockBlobStore {
    blobs: Mutex<HashMap<(String, String), StoredBlob>>,
    failing: HashSet<String>,
    uploads: Mutex<Vec<String>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            failing: HashSet::new(),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_blob(self, container: &str, path: &str, bytes: impl Into<Bytes>) -> Self {
        self.blobs.lock().unwrap().insert(
            (container.to_string(), path.to_string()),
            StoredBlob {
                bytes: bytes.into(),
                content_type: None,
            },
        );
        self
    }

    pub fn failing_upload(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Paths successfully uploaded, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploads_under(&self, prefix: &str) -> Vec<String> {
        self.uploads()
            .into_iter()
            .filter(|p| p.starts_with(prefix))
            .collect()
    }

    pub fn get(&self, container: &str, path: &str) -> Option<StoredBlob> {
        self.blobs
            .lock()
            .unwrap()
            .get(&(container.to_string(), path.to_string()))
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        container: &str,
        path: &str,
        options: &UploadOptions,
    ) -> std::result::Result<String, BlobError> {
        if self.failing.contains(path) {
            return Err(BlobError::Transport(format!(
                "MockBlobStore: upload to {path} refused"
            )));
        }
        self.blobs.lock().unwrap().insert(
            (container.to_string(), path.to_string()),
            StoredBlob {
                bytes,
                content_type: options.content_type.clone(),
            },
        );
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(path.to_string())
    }

    async fn read(&self, container: &str, path: &str) -> std::result::Result<Bytes, BlobError> {
        self.get(container, path)
            .map(|blob| blob.bytes)
            .ok_or_else(|| BlobError::NotFound {
                container: container.to_string(),
                path: path.to_string(),
            })
    }

    async fn list(
        &self,
        container: &str,
        prefix: &str,
    ) -> std::result::Result<Vec<String>, BlobError> {
        let mut paths: Vec<String> = self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, p)| c == container && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

// ---------------------------------------------------------------------------
// MemoryPostStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    posts: Vec<Post>,
    contents: Vec<ContentRecord>,
    labels: Vec<SpatialLabel>,
}

/// Stateful in-memory relational store with the same visible semantics as
/// the SQL backends (duplicate post ids rejected, content inserts ignore
/// conflicts, slot resolution happens at most once).
pub struct MemoryPostStore {
    state: Mutex<StoreState>,
    fail_existing_ids: bool,
    failing_inserts: HashSet<Uuid>,
    /// Content ids whose next insert fails; cleared once it fires.
    failing_content: Mutex<HashSet<Uuid>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            fail_existing_ids: false,
            failing_inserts: HashSet::new(),
            failing_content: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_post(self, post: Post) -> Self {
        self.state.lock().unwrap().posts.push(post);
        self
    }

    pub fn failing_existing_ids(mut self) -> Self {
        self.fail_existing_ids = true;
        self
    }

    pub fn failing_insert(mut self, id: Uuid) -> Self {
        self.failing_inserts.insert(id);
        self
    }

    pub fn failing_content_once(self, id: Uuid) -> Self {
        self.failing_content.lock().unwrap().insert(id);
        self
    }

    fn content_refused(&self, id: Uuid) -> StoreResult<()> {
        if self.failing_content.lock().unwrap().remove(&id) {
            return Err(StoreError::InvalidRow(format!(
                "MemoryPostStore: content insert of {id} refused"
            )));
        }
        Ok(())
    }

    pub fn post_count(&self) -> usize {
        self.state.lock().unwrap().posts.len()
    }

    pub fn has_post(&self, id: Uuid) -> bool {
        self.state.lock().unwrap().posts.iter().any(|p| p.id == id)
    }

    pub fn post(&self, id: Uuid) -> Option<Post> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn contents(&self) -> Vec<ContentRecord> {
        self.state.lock().unwrap().contents.clone()
    }
}

type StoreResult<T> = std::result::Result<T, StoreError>;

impl MemoryPostStore {
    fn check_post_insert(&self, state: &StoreState, post: &Post) -> StoreResult<()> {
        if self.failing_inserts.contains(&post.id) {
            return Err(StoreError::InvalidRow(format!(
                "MemoryPostStore: insert of {} refused",
                post.id
            )));
        }
        if state.posts.iter().any(|p| p.id == post.id) {
            return Err(StoreError::InvalidRow(format!(
                "MemoryPostStore: duplicate post {}",
                post.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn existing_ids(&self, ids: &[Uuid]) -> StoreResult<HashSet<Uuid>> {
        if self.fail_existing_ids {
            return Err(StoreError::InvalidRow(
                "MemoryPostStore: existing_ids failure".into(),
            ));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .posts
            .iter()
            .filter(|p| p.kind == SourceType::RedditPost && ids.contains(&p.id))
            .map(|p| p.id)
            .collect())
    }

    async fn insert_post(&self, post: &Post) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_post_insert(&state, post)?;
        state.posts.push(post.clone());
        Ok(())
    }

    async fn insert_post_with_content(
        &self,
        post: &Post,
        content: &ContentRecord,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_post_insert(&state, post)?;
        self.content_refused(content.id)?;
        if state.contents.iter().any(|c| c.id == content.id) {
            return Err(StoreError::InvalidRow(format!(
                "MemoryPostStore: duplicate content {}",
                content.id
            )));
        }
        state.posts.push(post.clone());
        state.contents.push(content.clone());
        Ok(())
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        Ok(self.post(id))
    }

    async fn insert_content(&self, content: &ContentRecord) -> StoreResult<u64> {
        self.content_refused(content.id)?;
        let mut state = self.state.lock().unwrap();
        if !state.posts.iter().any(|p| p.id == content.source) {
            return Err(StoreError::InvalidRow(format!(
                "MemoryPostStore: content {} references missing post {}",
                content.id, content.source
            )));
        }
        if state.contents.iter().any(|c| c.id == content.id) {
            return Ok(0);
        }
        state.contents.push(content.clone());
        Ok(1)
    }

    async fn get_content(&self, id: Uuid) -> StoreResult<Option<ContentRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.contents.iter().find(|c| c.id == id).cloned())
    }

    async fn update_post_static_slot(
        &self,
        post_id: Uuid,
        slot: StaticFileType,
        unassigned_marker: &str,
        resolved_id: Uuid,
        resolved_path: &str,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().unwrap();
        let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(0);
        };
        let resolved = post
            .fields
            .resolve_slot(slot, unassigned_marker, resolved_id, resolved_path);
        Ok(u64::from(resolved))
    }

    async fn posts_with_unresolved_slot(
        &self,
        ids: Option<&[Uuid]>,
        slot: StaticFileType,
    ) -> StoreResult<Vec<Post>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .posts
            .iter()
            .filter(|p| p.kind == SourceType::RedditPost && p.fields.has_unassigned(slot))
            .filter(|p| ids.is_none_or(|ids| ids.contains(&p.id)))
            .cloned()
            .collect())
    }

    async fn add_labels(&self, labels: &[SpatialLabel]) -> StoreResult<u64> {
        for label in labels {
            label.validate()?;
        }
        let mut state = self.state.lock().unwrap();
        for label in labels {
            if !state.posts.iter().any(|p| p.id == label.post_id) {
                return Err(StoreError::InvalidRow(format!(
                    "MemoryPostStore: label {} references missing post",
                    label.label_id
                )));
            }
            if state.labels.iter().any(|l| l.label_id == label.label_id) {
                return Err(StoreError::InvalidRow(format!(
                    "MemoryPostStore: duplicate label {}",
                    label.label_id
                )));
            }
        }
        state.labels.extend(labels.iter().cloned());
        Ok(labels.len() as u64)
    }

    async fn remove_label(&self, label_id: &str) -> StoreResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.labels.len();
        state.labels.retain(|l| l.label_id != label_id);
        Ok((before - state.labels.len()) as u64)
    }

    async fn replace_post_labels(&self, post_id: Uuid, labels: &[SpatialLabel]) -> StoreResult<u64> {
        for label in labels {
            label.validate()?;
        }
        let mut state = self.state.lock().unwrap();
        state.labels.retain(|l| l.post_id != post_id);
        state.labels.extend(labels.iter().map(|l| SpatialLabel {
            post_id,
            ..l.clone()
        }));
        Ok(labels.len() as u64)
    }

    async fn labels_for_post(&self, post_id: Uuid) -> StoreResult<Vec<SpatialLabel>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .labels
            .iter()
            .filter(|l| l.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn unlabeled_posts(&self) -> StoreResult<Vec<Post>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .posts
            .iter()
            .filter(|p| !state.labels.iter().any(|l| l.post_id == p.id))
            .cloned()
            .collect())
    }

    async fn posts_with_labels(&self) -> StoreResult<Vec<PostWithLabel>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .labels
            .iter()
            .filter_map(|label| {
                let post = state.posts.iter().find(|p| p.id == label.post_id)?;
                Some(PostWithLabel {
                    post: post.clone(),
                    label: label.clone(),
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockMediaFetcher
// ---------------------------------------------------------------------------

/// HashMap-based media fetcher. Returns `Err` for unregistered URLs.
pub struct MockMediaFetcher {
    responses: HashMap<String, Bytes>,
    fetched: Mutex<Vec<String>>,
}

impl MockMediaFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn on_url(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.responses.insert(url.to_string(), body.into());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for MockMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("MockMediaFetcher: no response registered for {url}"))
    }
}

// ---------------------------------------------------------------------------
// AutoConfirmGate
// ---------------------------------------------------------------------------

pub struct AutoConfirmGate {
    refuse: bool,
    prompts: AtomicUsize,
}

impl AutoConfirmGate {
    pub fn new() -> Self {
        Self {
            refuse: false,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperatorGate for AutoConfirmGate {
    async fn confirm(&self, _prompt: &str) -> Result<()> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            bail!("AutoConfirmGate: operator refused");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Config with no delays, dummy credentials and the `reddit-posts` container.
pub fn test_config() -> IngestConfig {
    IngestConfig {
        reddit_username: "archivist".into(),
        reddit_password: "hunter2".into(),
        db_engine: DbEngine::Sqlite {
            url: "sqlite::memory:".into(),
        },
        root_dir_name: CONTAINER.into(),
        content_type: "application/octet-stream".into(),
        blob_backend: BlobBackend::Fs {
            root: PathBuf::from("."),
        },
        browserless_url: "http://localhost:3000".into(),
        browserless_token: None,
        politeness: Politeness::none(),
        page_delay: Politeness::none(),
        max_pages: None,
    }
}

/// A listing entry for `native_id` (e.g. `thing_t3_a`) of the given kind.
pub fn listing_entry(native_id: &str, kind: &str) -> ListingEntry {
    let short = native_id.rsplit('_').next().unwrap_or(native_id);
    ListingEntry {
        native_id: native_id.to_string(),
        subreddit: Some("test".into()),
        permalink: format!("/r/test/comments/{short}/post_{short}/"),
        title: format!("Post {short}"),
        timestamp_ms: 1_741_963_920_000,
        author: Some("someone".into()),
        author_fullname: Some("t2_abc123".into()),
        kind: Some(kind.to_string()),
    }
}

pub fn listing_page(entries: Vec<ListingEntry>, next_page: Option<&str>) -> ListingPage {
    ListingPage {
        entries,
        next_page: next_page.map(String::from),
    }
}

/// Canonical post URL the orchestrator will request artifacts for.
pub fn post_url(entry: &ListingEntry) -> String {
    Post::from_listing(entry).fields.url
}

/// A raw post document shaped like Reddit's `.json` response. `dash_url`
/// adds a hosted video; `comments` become the second listing's children.
pub fn raw_post_json(
    permalink: &str,
    media_url: Option<&str>,
    dash_url: Option<&str>,
    comments: Vec<Value>,
) -> Value {
    let mut data = json!({
        "created_utc": 1_741_963_920.0,
        "permalink": permalink,
        "subreddit": "test",
        "title": "A title",
        "author": "someone",
        "author_fullname": "t2_abc123",
    });
    if let Some(url) = media_url {
        data["url"] = json!(url);
    }
    if let Some(dash_url) = dash_url {
        data["secure_media"] = json!({
            "reddit_video": {
                "dash_url": dash_url,
                "duration": 23,
                "is_gif": false,
            }
        });
    }
    json!([
        { "kind": "Listing", "data": { "children": [{ "kind": "t3", "data": data }] } },
        { "kind": "Listing", "data": { "children": comments } },
    ])
}
