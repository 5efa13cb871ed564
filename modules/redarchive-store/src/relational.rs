// Relational store trait. Two backends (Postgres, SQLite) share the same
// logical schema:
//
//   source(id PK, type, created_date, fields JSON)
//   content(id PK, source FK, type, created_date, storage_path, fields JSON)
//   labels(label_id PK, post_id FK, comment, geometry WKT)
//
// Every method runs in its own short transaction; nothing spans posts.
// A post and its content rows may share one.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use redarchive_common::{
    ContentRecord, ContentType, DbEngine, Post, PostFields, PostWithLabel, SourceType,
    SpatialLabel, StaticFileType,
};

use crate::error::{Result, StoreError};
use crate::postgres::PgPostStore;
use crate::sqlite::SqlitePostStore;

#[async_trait]
pub trait PostStore: Send + Sync {
    // --- Ingestion ---

    /// The subset of `ids` already stored as `reddit_post` rows.
    async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Insert one post row. All-or-nothing; a duplicate id is an error.
    async fn insert_post(&self, post: &Post) -> Result<()>;

    /// Insert a post together with the content row one of its slots already
    /// points at. Both rows commit or neither does.
    async fn insert_post_with_content(&self, post: &Post, content: &ContentRecord) -> Result<()>;

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>>;

    // --- Artifact resolution ---

    /// Insert a content row. Returns rows affected: 0 when a row with the
    /// same id already exists (left untouched), 1 otherwise.
    async fn insert_content(&self, content: &ContentRecord) -> Result<u64>;

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentRecord>>;

    /// Resolve the post's first slot matching `(slot, unassigned_marker)`.
    /// Returns 1 when such a slot existed and was resolved, 0 otherwise.
    async fn update_post_static_slot(
        &self,
        post_id: Uuid,
        slot: StaticFileType,
        unassigned_marker: &str,
        resolved_id: Uuid,
        resolved_path: &str,
    ) -> Result<u64>;

    /// Posts holding at least one unresolved slot of `slot`, optionally
    /// restricted to `ids`.
    async fn posts_with_unresolved_slot(
        &self,
        ids: Option<&[Uuid]>,
        slot: StaticFileType,
    ) -> Result<Vec<Post>>;

    // --- Labels ---

    /// Insert labels in one transaction. Returns rows inserted.
    async fn add_labels(&self, labels: &[SpatialLabel]) -> Result<u64>;

    async fn remove_label(&self, label_id: &str) -> Result<u64>;

    /// Swap every label of `post_id` for `labels`, atomically.
    async fn replace_post_labels(&self, post_id: Uuid, labels: &[SpatialLabel]) -> Result<u64>;

    async fn labels_for_post(&self, post_id: Uuid) -> Result<Vec<SpatialLabel>>;

    async fn unlabeled_posts(&self) -> Result<Vec<Post>>;

    async fn posts_with_labels(&self) -> Result<Vec<PostWithLabel>>;
}

/// Open the configured backend and run its migrations.
pub async fn connect(engine: &DbEngine) -> Result<Box<dyn PostStore>> {
    match engine {
        DbEngine::Postgres { url } => {
            let store = PgPostStore::connect(url).await?;
            store.migrate().await?;
            Ok(Box::new(store))
        }
        DbEngine::Sqlite { url } => {
            let store = SqlitePostStore::connect(url).await?;
            store.migrate().await?;
            Ok(Box::new(store))
        }
    }
}

pub(crate) fn validate_labels(labels: &[SpatialLabel]) -> Result<()> {
    for label in labels {
        label.validate()?;
    }
    Ok(())
}

// --- Row conversion shared by both backends ---

pub(crate) fn to_timestamp(epoch_ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(epoch_ms)
        .ok_or_else(|| StoreError::Validation(format!("timestamp out of range: {epoch_ms}")))
}

pub(crate) fn source_type(raw: &str) -> Result<SourceType> {
    match raw {
        "reddit_post" => Ok(SourceType::RedditPost),
        other => Err(StoreError::InvalidRow(format!("unknown source type {other}"))),
    }
}

pub(crate) fn content_type(raw: &str) -> Result<ContentType> {
    match raw {
        "VIDEO_DASH_STREAM" => Ok(ContentType::VideoDashStream),
        other => Err(StoreError::InvalidRow(format!("unknown content type {other}"))),
    }
}

pub(crate) fn post_from_row(
    id: Uuid,
    kind: &str,
    created_date: DateTime<Utc>,
    fields: PostFields,
) -> Result<Post> {
    Ok(Post {
        id,
        kind: source_type(kind)?,
        created_date: created_date.timestamp_millis(),
        fields,
    })
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::InvalidRow(format!("bad uuid {raw}: {e}")))
}
