use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use redarchive_common::{
    ContentRecord, Post, PostFields, PostWithLabel, SourceType, SpatialLabel, StaticFileType,
    UNASSIGNED_SLOT_ID,
};

use crate::error::Result;
use crate::relational::{content_type, post_from_row, to_timestamp, validate_labels, PostStore};

type SourceRow = (Uuid, String, DateTime<Utc>, Json<PostFields>);
type LabelRow = (String, Uuid, Option<String>, String);

fn post_row(row: SourceRow) -> Result<Post> {
    let (id, kind, created_date, Json(fields)) = row;
    post_from_row(id, &kind, created_date, fields)
}

fn label_row(row: LabelRow) -> SpatialLabel {
    let (label_id, post_id, comment, geometry) = row;
    SpatialLabel {
        label_id,
        post_id,
        geometry,
        comment,
    }
}

/// Postgres-backed store. Post and content fields live in JSONB columns.
#[derive(Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres").run(&self.pool).await?;
        info!("Postgres migrations applied");
        Ok(())
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT id FROM source
            WHERE id = ANY($1) AND type = $2
            "#,
        )
        .bind(ids)
        .bind(SourceType::RedditPost.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_post(&self, post: &Post) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO source (id, type, created_date, fields)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(post.id)
        .bind(post.kind.as_str())
        .bind(to_timestamp(post.created_date)?)
        .bind(Json(&post.fields))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(post_id = %post.id, "Inserted post");
        Ok(())
    }

    async fn insert_post_with_content(&self, post: &Post, content: &ContentRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO source (id, type, created_date, fields)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(post.id)
        .bind(post.kind.as_str())
        .bind(to_timestamp(post.created_date)?)
        .bind(Json(&post.fields))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO content (id, source, type, created_date, storage_path, fields)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(content.id)
        .bind(content.source)
        .bind(content.kind.as_str())
        .bind(to_timestamp(content.created_date)?)
        .bind(&content.storage_path)
        .bind(Json(&content.fields))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(post_id = %post.id, content_id = %content.id, "Inserted post with content");
        Ok(())
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, type, created_date, fields
            FROM source
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(post_row).transpose()
    }

    async fn insert_content(&self, content: &ContentRecord) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO content (id, source, type, created_date, storage_path, fields)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(content.id)
        .bind(content.source)
        .bind(content.kind.as_str())
        .bind(to_timestamp(content.created_date)?)
        .bind(&content.storage_path)
        .bind(Json(&content.fields))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, DateTime<Utc>, String, serde_json::Value)>(
            r#"
            SELECT id, source, type, created_date, storage_path, fields
            FROM content
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, source, kind, created_date, storage_path, fields)) = row else {
            return Ok(None);
        };
        Ok(Some(ContentRecord {
            id,
            source,
            kind: content_type(&kind)?,
            created_date: created_date.timestamp_millis(),
            storage_path,
            fields,
        }))
    }

    async fn update_post_static_slot(
        &self,
        post_id: Uuid,
        slot: StaticFileType,
        unassigned_marker: &str,
        resolved_id: Uuid,
        resolved_path: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (Json<PostFields>,)>(
            "SELECT fields FROM source WHERE id = $1 FOR UPDATE",
        )
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((Json(mut fields),)) = row else {
            return Ok(0);
        };
        if !fields.resolve_slot(slot, unassigned_marker, resolved_id, resolved_path) {
            return Ok(0);
        }

        let result = sqlx::query("UPDATE source SET fields = $2 WHERE id = $1")
            .bind(post_id)
            .bind(Json(&fields))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn posts_with_unresolved_slot(
        &self,
        ids: Option<&[Uuid]>,
        slot: StaticFileType,
    ) -> Result<Vec<Post>> {
        let pattern = serde_json::json!([{ "type": slot.as_str(), "id": UNASSIGNED_SLOT_ID }]);
        let ids: Option<Vec<Uuid>> = ids.map(|ids| ids.to_vec());

        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, type, created_date, fields
            FROM source
            WHERE type = $1
              AND fields -> 'static_files' @> $2
              AND ($3::uuid[] IS NULL OR id = ANY($3))
            ORDER BY created_date
            "#,
        )
        .bind(SourceType::RedditPost.as_str())
        .bind(Json(pattern))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(post_row).collect()
    }

    async fn add_labels(&self, labels: &[SpatialLabel]) -> Result<u64> {
        validate_labels(labels)?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for label in labels {
            inserted += sqlx::query(
                r#"
                INSERT INTO labels (label_id, post_id, comment, geometry)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&label.label_id)
            .bind(label.post_id)
            .bind(&label.comment)
            .bind(&label.geometry)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn remove_label(&self, label_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM labels WHERE label_id = $1")
            .bind(label_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_post_labels(&self, post_id: Uuid, labels: &[SpatialLabel]) -> Result<u64> {
        validate_labels(labels)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM labels WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        for label in labels {
            inserted += sqlx::query(
                r#"
                INSERT INTO labels (label_id, post_id, comment, geometry)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&label.label_id)
            .bind(post_id)
            .bind(&label.comment)
            .bind(&label.geometry)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn labels_for_post(&self, post_id: Uuid) -> Result<Vec<SpatialLabel>> {
        let rows = sqlx::query_as::<_, LabelRow>(
            r#"
            SELECT label_id, post_id, comment, geometry
            FROM labels
            WHERE post_id = $1
            ORDER BY label_id
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(label_row).collect())
    }

    async fn unlabeled_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT s.id, s.type, s.created_date, s.fields
            FROM source s
            LEFT JOIN labels l ON l.post_id = s.id
            WHERE s.type = $1 AND l.label_id IS NULL
            ORDER BY s.created_date
            "#,
        )
        .bind(SourceType::RedditPost.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(post_row).collect()
    }

    async fn posts_with_labels(&self) -> Result<Vec<PostWithLabel>> {
        let rows = sqlx::query_as::<
            _,
            (Uuid, String, DateTime<Utc>, Json<PostFields>, String, Option<String>, String),
        >(
            r#"
            SELECT s.id, s.type, s.created_date, s.fields, l.label_id, l.comment, l.geometry
            FROM source s
            JOIN labels l ON l.post_id = s.id
            ORDER BY s.created_date, l.label_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, kind, created_date, fields, label_id, comment, geometry)| {
                Ok(PostWithLabel {
                    post: post_row((id, kind, created_date, fields))?,
                    label: SpatialLabel {
                        label_id,
                        post_id: id,
                        geometry,
                        comment,
                    },
                })
            })
            .collect()
    }
}
