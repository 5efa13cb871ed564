use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use redarchive_common::{
    ContentRecord, Post, PostFields, PostWithLabel, SourceType, SpatialLabel, StaticFileType,
    UNASSIGNED_SLOT_ID,
};

use crate::error::Result;
use crate::relational::{
    content_type, parse_uuid, post_from_row, to_timestamp, validate_labels, PostStore,
};

// Ids are stored as hyphenated TEXT; JSON columns as TEXT.
type SourceRow = (String, String, DateTime<Utc>, Json<PostFields>);
type LabelRow = (String, String, Option<String>, String);

fn post_row(row: SourceRow) -> Result<Post> {
    let (id, kind, created_date, Json(fields)) = row;
    post_from_row(parse_uuid(&id)?, &kind, created_date, fields)
}

fn label_row(row: LabelRow) -> Result<SpatialLabel> {
    let (label_id, post_id, comment, geometry) = row;
    Ok(SpatialLabel {
        label_id,
        post_id: parse_uuid(&post_id)?,
        geometry,
        comment,
    })
}

/// SQLite-backed store for single-machine runs and tests.
#[derive(Clone)]
pub struct SqlitePostStore {
    pool: SqlitePool,
}

impl SqlitePostStore {
    /// `sqlite::memory:` gets a single long-lived connection, since every
    /// new connection would open a fresh empty database.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        info!(in_memory, "Connected to SQLite");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite").run(&self.pool).await?;
        info!("SQLite migrations applied");
        Ok(())
    }

    async fn insert_labels(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        post_id: Option<Uuid>,
        labels: &[SpatialLabel],
    ) -> Result<u64> {
        let mut inserted = 0;
        for label in labels {
            let post_id = post_id.unwrap_or(label.post_id);
            inserted += sqlx::query(
                r#"
                INSERT INTO labels (label_id, post_id, comment, geometry)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&label.label_id)
            .bind(post_id.to_string())
            .bind(&label.comment)
            .bind(&label.geometry)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM source WHERE type = ");
        query.push_bind(SourceType::RedditPost.as_str());
        query.push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let rows: Vec<(String,)> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.iter().map(|(id,)| parse_uuid(id)).collect()
    }

    async fn insert_post(&self, post: &Post) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO source (id, type, created_date, fields)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(post.id.to_string())
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
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(post.id.to_string())
        .bind(post.kind.as_str())
        .bind(to_timestamp(post.created_date)?)
        .bind(Json(&post.fields))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO content (id, source, type, created_date, storage_path, fields)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(content.id.to_string())
        .bind(content.source.to_string())
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
            "SELECT id, type, created_date, fields FROM source WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(post_row).transpose()
    }

    async fn insert_content(&self, content: &ContentRecord) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO content (id, source, type, created_date, storage_path, fields)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(content.id.to_string())
        .bind(content.source.to_string())
        .bind(content.kind.as_str())
        .bind(to_timestamp(content.created_date)?)
        .bind(&content.storage_path)
        .bind(Json(&content.fields))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        let row = sqlx::query_as::<_, (String, String, String, DateTime<Utc>, String, Json<serde_json::Value>)>(
            r#"
            SELECT id, source, type, created_date, storage_path, fields
            FROM content
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, source, kind, created_date, storage_path, Json(fields))) = row else {
            return Ok(None);
        };
        Ok(Some(ContentRecord {
            id: parse_uuid(&id)?,
            source: parse_uuid(&source)?,
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

        let row = sqlx::query_as::<_, (Json<PostFields>,)>("SELECT fields FROM source WHERE id = ?1")
            .bind(post_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let Some((Json(mut fields),)) = row else {
            return Ok(0);
        };
        if !fields.resolve_slot(slot, unassigned_marker, resolved_id, resolved_path) {
            return Ok(0);
        }

        let result = sqlx::query("UPDATE source SET fields = ?2 WHERE id = ?1")
            .bind(post_id.to_string())
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
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, type, created_date, fields FROM source WHERE type = ",
        );
        query.push_bind(SourceType::RedditPost.as_str());
        query.push(
            " AND EXISTS (SELECT 1 FROM json_each(source.fields, '$.static_files') AS slot \
             WHERE json_extract(slot.value, '$.type') = ",
        );
        query.push_bind(slot.as_str());
        query.push(" AND json_extract(slot.value, '$.id') = ");
        query.push_bind(UNASSIGNED_SLOT_ID);
        query.push(")");

        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in ids {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY created_date");

        let rows: Vec<SourceRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(post_row).collect()
    }

    async fn add_labels(&self, labels: &[SpatialLabel]) -> Result<u64> {
        validate_labels(labels)?;

        let mut tx = self.pool.begin().await?;
        let inserted = Self::insert_labels(&mut tx, None, labels).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn remove_label(&self, label_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM labels WHERE label_id = ?1")
            .bind(label_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_post_labels(&self, post_id: Uuid, labels: &[SpatialLabel]) -> Result<u64> {
        validate_labels(labels)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM labels WHERE post_id = ?1")
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?;
        let inserted = Self::insert_labels(&mut tx, Some(post_id), labels).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn labels_for_post(&self, post_id: Uuid) -> Result<Vec<SpatialLabel>> {
        let rows = sqlx::query_as::<_, LabelRow>(
            r#"
            SELECT label_id, post_id, comment, geometry
            FROM labels
            WHERE post_id = ?1
            ORDER BY label_id
            "#,
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(label_row).collect()
    }

    async fn unlabeled_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT s.id, s.type, s.created_date, s.fields
            FROM source s
            LEFT JOIN labels l ON l.post_id = s.id
            WHERE s.type = ?1 AND l.label_id IS NULL
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
            (String, String, DateTime<Utc>, Json<PostFields>, String, Option<String>, String),
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
                let post = post_row((id, kind, created_date, fields))?;
                let post_id = post.id;
                Ok(PostWithLabel {
                    post,
                    label: SpatialLabel {
                        label_id,
                        post_id,
                        geometry,
                        comment,
                    },
                })
            })
            .collect()
    }
}
