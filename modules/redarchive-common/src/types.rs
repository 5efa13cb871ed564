use std::sync::LazyLock;

use chrono::{DateTime, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RedArchiveError;
use crate::identity::{
    derive_id, derive_post_id, DELETED_USER_ID, DELETED_USER_KEY, NOT_FOUND_USER_ID,
    NOT_FOUND_USER_KEY,
};

/// Id value carried by a static-file slot that has not been resolved yet.
pub const UNASSIGNED_SLOT_ID: &str = "NULL";

/// Author value Reddit reports for deleted accounts.
pub const DELETED_AUTHOR: &str = "[deleted]";

const REDDIT_ORIGIN: &str = "https://www.reddit.com";

// --- Source rows ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    RedditPost,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::RedditPost => "reddit_post",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaticFileType {
    #[serde(rename = "REDDIT_VIDEO")]
    Video,
    #[serde(rename = "REDDIT_AUDIO")]
    Audio,
}

impl StaticFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaticFileType::Video => "REDDIT_VIDEO",
            StaticFileType::Audio => "REDDIT_AUDIO",
        }
    }
}

impl std::fmt::Display for StaticFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A placeholder for an artifact attached to a post. Starts with
/// `id == UNASSIGNED_SLOT_ID` and no path; resolved exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFileEntry {
    #[serde(rename = "type")]
    pub kind: StaticFileType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StaticFileEntry {
    pub fn unassigned(kind: StaticFileType) -> Self {
        Self {
            kind,
            id: UNASSIGNED_SLOT_ID.to_string(),
            path: None,
        }
    }

    pub fn resolved(kind: StaticFileType, id: Uuid, path: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            path: Some(path.to_string()),
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.id == UNASSIGNED_SLOT_ID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditUser {
    pub id: Uuid,
    pub name: String,
    pub full_name: String,
}

impl RedditUser {
    /// Resolve an author. Missing authors and deleted accounts collapse onto
    /// the two sentinel users; everyone else is keyed by the platform
    /// full-name, never the display name.
    pub fn from_author(name: Option<&str>, full_name: Option<&str>) -> Self {
        match (name, full_name) {
            (Some(DELETED_AUTHOR), _) => Self::deleted(),
            (Some(name), Some(full_name)) if !full_name.is_empty() => Self {
                id: derive_id(full_name),
                name: name.to_string(),
                full_name: full_name.to_string(),
            },
            _ => Self::not_found(),
        }
    }

    pub fn deleted() -> Self {
        Self {
            id: *DELETED_USER_ID,
            name: DELETED_AUTHOR.to_string(),
            full_name: DELETED_USER_KEY.to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            id: *NOT_FOUND_USER_ID,
            name: NOT_FOUND_USER_KEY.to_string(),
            full_name: NOT_FOUND_USER_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostFields {
    pub subreddit: String,
    pub url: String,
    pub title: String,
    pub static_downloaded_flag: bool,
    pub screenshot_path: Option<String>,
    pub json_file_path: Option<String>,
    /// Listing timestamp, epoch milliseconds.
    pub post_created_date: i64,
    pub static_root_url: Option<String>,
    #[serde(default)]
    pub static_files: Vec<StaticFileEntry>,
    pub user: Option<RedditUser>,
}

impl PostFields {
    /// Resolve the first unassigned slot of `kind` whose id equals
    /// `unassigned_marker`. Returns false when no such slot exists, which
    /// leaves the fields untouched.
    pub fn resolve_slot(
        &mut self,
        kind: StaticFileType,
        unassigned_marker: &str,
        resolved_id: Uuid,
        resolved_path: &str,
    ) -> bool {
        let Some(slot) = self
            .static_files
            .iter_mut()
            .find(|s| s.kind == kind && s.id == unassigned_marker)
        else {
            return false;
        };
        slot.id = resolved_id.to_string();
        slot.path = Some(resolved_path.to_string());
        self.static_downloaded_flag = true;
        true
    }

    pub fn has_unassigned(&self, kind: StaticFileType) -> bool {
        self.static_files
            .iter()
            .any(|s| s.kind == kind && s.is_unassigned())
    }
}

/// A row of the `source` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: SourceType,
    /// Epoch milliseconds, UTC.
    pub created_date: i64,
    pub fields: PostFields,
}

impl Post {
    /// Build a post row from one scraped listing element. Blob paths are
    /// the conventional `{id}/screenshot.png` and `{id}/post.json`; the
    /// orchestrator overwrites them with whatever the blob store returns.
    pub fn from_listing(entry: &ListingEntry) -> Self {
        let id = derive_post_id(&entry.native_id);
        let mut static_files = Vec::new();
        if entry.kind.as_deref() == Some("video") {
            static_files.push(StaticFileEntry::unassigned(StaticFileType::Video));
        }

        Self {
            id,
            kind: SourceType::RedditPost,
            created_date: entry.timestamp_ms,
            fields: PostFields {
                subreddit: entry.subreddit.clone().unwrap_or_default(),
                url: canonical_url(&entry.permalink),
                title: entry.title.clone(),
                static_downloaded_flag: false,
                screenshot_path: Some(screenshot_path(id)),
                json_file_path: Some(json_path(id)),
                post_created_date: entry.timestamp_ms,
                static_root_url: Some(format!("{id}/")),
                static_files,
                user: Some(RedditUser::from_author(
                    entry.author.as_deref(),
                    entry.author_fullname.as_deref(),
                )),
            },
        }
    }

    /// Rebuild a post from the raw `.json` document Reddit serves for it.
    /// Used when migrating blobs that were uploaded without a row.
    pub fn from_post_json(id: Uuid, raw: &serde_json::Value) -> Result<Self, RedArchiveError> {
        let data = raw
            .pointer("/0/data/children/0/data")
            .ok_or_else(|| RedArchiveError::MalformedPost("missing post listing".into()))?;

        let created_utc = data
            .get("created_utc")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| RedArchiveError::MalformedPost("missing created_utc".into()))?;
        let created_ms = (created_utc * 1000.0) as i64;

        let text = |key: &str| data.get(key).and_then(|v| v.as_str());
        let permalink = text("permalink")
            .ok_or_else(|| RedArchiveError::MalformedPost("missing permalink".into()))?;

        Ok(Self {
            id,
            kind: SourceType::RedditPost,
            created_date: created_ms,
            fields: PostFields {
                subreddit: text("subreddit").unwrap_or_default().to_string(),
                url: canonical_url(permalink),
                title: text("title").unwrap_or_default().to_string(),
                static_downloaded_flag: true,
                screenshot_path: None,
                json_file_path: Some(json_path(id)),
                post_created_date: created_ms,
                static_root_url: Some(format!("{id}/")),
                static_files: Vec::new(),
                user: Some(RedditUser::from_author(
                    text("author"),
                    text("author_fullname"),
                )),
            },
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created_date).unwrap_or_default()
    }
}

pub fn screenshot_path(post_id: Uuid) -> String {
    format!("{post_id}/screenshot.png")
}

pub fn json_path(post_id: Uuid) -> String {
    format!("{post_id}/post.json")
}

fn canonical_url(permalink: &str) -> String {
    if permalink.starts_with("http://") || permalink.starts_with("https://") {
        return permalink.to_string();
    }
    format!("{REDDIT_ORIGIN}/{}", permalink.trim_start_matches('/'))
}

// --- Scraped listing ---

/// One post element as read off a listing page, before any id derivation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingEntry {
    /// Platform-native element id, the natural key for the post id.
    pub native_id: String,
    pub subreddit: Option<String>,
    pub permalink: String,
    pub title: String,
    pub timestamp_ms: i64,
    pub author: Option<String>,
    pub author_fullname: Option<String>,
    /// Listing kind (`video`, `image`, `self`, ...).
    pub kind: Option<String>,
}

// --- Content rows ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    VideoDashStream,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::VideoDashStream => "VIDEO_DASH_STREAM",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `content` table: an artifact resolved from a post slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    /// Owning post id.
    pub source: Uuid,
    #[serde(rename = "type")]
    pub kind: ContentType,
    /// Epoch milliseconds, UTC.
    pub created_date: i64,
    pub storage_path: String,
    pub fields: serde_json::Value,
}

impl ContentRecord {
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created_date).unwrap_or_default()
    }
}

/// Midnight UTC of the day containing `epoch_ms`, in epoch milliseconds.
pub fn day_start_ms(epoch_ms: i64) -> i64 {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| {
            dt.date_naive()
                .and_time(NaiveTime::MIN)
                .and_utc()
                .timestamp_millis()
        })
        .unwrap_or(epoch_ms)
}

// --- Labels ---

static WKT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(POINT|LINESTRING|POLYGON|MULTIPOINT|MULTILINESTRING|MULTIPOLYGON|GEOMETRYCOLLECTION)\s*(Z|M|ZM)?\s*(\(.*\)|EMPTY)\s*$",
    )
    .expect("valid regex")
});

/// A manually drawn geometry attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialLabel {
    pub label_id: String,
    pub post_id: Uuid,
    /// Well-known text, WGS84.
    pub geometry: String,
    pub comment: Option<String>,
}

impl SpatialLabel {
    pub fn validate(&self) -> Result<(), RedArchiveError> {
        if self.label_id.trim().is_empty() {
            return Err(RedArchiveError::Validation("label_id is empty".into()));
        }
        if !WKT_RE.is_match(&self.geometry) {
            return Err(RedArchiveError::Validation(format!(
                "label {} geometry is not well-known text",
                self.label_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostWithLabel {
    pub post: Post,
    pub label: SpatialLabel,
}
