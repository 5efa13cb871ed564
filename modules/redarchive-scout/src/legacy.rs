// Legacy blob migration.
//
// Older runs uploaded `{post_id}/post.json` (and sometimes a screenshot and
// a `Graph_DASH.mpd`) without ever writing a row. This pass walks the blob
// container and rebuilds the missing rows from the stored JSON.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use redarchive_common::{
    derive_id, json_path, screenshot_path, ContentRecord, ContentType,
    IngestConfig, Post, StaticFileEntry, StaticFileType,
};
use redarchive_store::{BlobStore, PostStore};

const LEGACY_MANIFEST: &str = "Graph_DASH.mpd";
const LEGACY_NOTE: &str = "Came from legacy migration. No migration metadata found.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// Directories holding a `post.json`.
    pub candidates: usize,
    pub already_stored: usize,
    pub migrated: Vec<Uuid>,
    pub with_video: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

pub struct LegacyMigrator<'a> {
    blobs: &'a dyn BlobStore,
    store: &'a dyn PostStore,
    config: &'a IngestConfig,
}

impl<'a> LegacyMigrator<'a> {
    pub fn new(blobs: &'a dyn BlobStore, store: &'a dyn PostStore, config: &'a IngestConfig) -> Self {
        Self {
            blobs,
            store,
            config,
        }
    }

    pub async fn run(&self) -> Result<MigrationReport> {
        let container = self.config.root_dir_name.as_str();
        let paths = self
            .blobs
            .list(container, "")
            .await
            .with_context(|| format!("Failed to list container {container}"))?;

        let directories = group_by_post(&paths);
        let ids: Vec<Uuid> = directories
            .iter()
            .filter(|(_, files)| files.contains("post.json"))
            .map(|(id, _)| *id)
            .collect();

        let existing = self
            .store
            .existing_ids(&ids)
            .await
            .context("Existing-post query failed")?;

        let mut report = MigrationReport {
            candidates: ids.len(),
            already_stored: existing.len(),
            ..Default::default()
        };
        info!(
            container,
            candidates = ids.len(),
            already_stored = existing.len(),
            "Migrating legacy blobs"
        );

        for id in ids.into_iter().filter(|id| !existing.contains(id)) {
            let files = &directories[&id];
            match self.migrate_post(id, files).await {
                Ok(has_video) => {
                    report.migrated.push(id);
                    if has_video {
                        report.with_video.push(id);
                    }
                }
                Err(e) => {
                    error!(post_id = %id, "Legacy migration failed: {e:#}");
                    report.failed.push((id, format!("{e:#}")));
                }
            }
        }

        info!(
            migrated = report.migrated.len(),
            with_video = report.with_video.len(),
            failed = report.failed.len(),
            "Legacy migration finished"
        );
        Ok(report)
    }

    /// Rebuild and insert one post. Returns whether a video slot was added.
    async fn migrate_post(&self, id: Uuid, files: &BTreeSet<String>) -> Result<bool> {
        let raw = self
            .blobs
            .read(&self.config.root_dir_name, &json_path(id))
            .await
            .context("Failed to read post.json")?;
        let document: Value = serde_json::from_slice(&raw).context("post.json is not valid JSON")?;
        let mut post = Post::from_post_json(id, &document)?;

        if files.contains("screenshot.png") {
            post.fields.screenshot_path = Some(screenshot_path(id));
        }

        let video = files.contains(LEGACY_MANIFEST).then(|| {
            let path = format!("{id}/{LEGACY_MANIFEST}");
            ContentRecord {
                id: derive_id(&path),
                source: id,
                kind: ContentType::VideoDashStream,
                created_date: post.created_date,
                storage_path: path,
                fields: json!({ "note": LEGACY_NOTE }),
            }
        });
        if let Some(content) = &video {
            post.fields.static_files.push(StaticFileEntry::resolved(
                StaticFileType::Video,
                content.id,
                &content.storage_path,
            ));
        }

        // A resolved slot commits together with the content row it names.
        match &video {
            Some(content) => self
                .store
                .insert_post_with_content(&post, content)
                .await
                .context("Post and content insert failed")?,
            None => self
                .store
                .insert_post(&post)
                .await
                .context("Post insert failed")?,
        }

        info!(post_id = %id, video = video.is_some(), "Migrated legacy post");
        Ok(video.is_some())
    }
}

/// Group blob paths `{post_id}/{file}` by post id. Paths whose first segment
/// is not a UUID, or that sit deeper than one directory, are ignored.
fn group_by_post(paths: &[String]) -> BTreeMap<Uuid, BTreeSet<String>> {
    let mut directories: BTreeMap<Uuid, BTreeSet<String>> = BTreeMap::new();
    for path in paths {
        let Some((dir, file)) = path.split_once('/') else {
            continue;
        };
        if file.contains('/') {
            continue;
        }
        let Ok(id) = Uuid::parse_str(dir) else {
            continue;
        };
        directories.entry(id).or_default().insert(file.to_string());
    }
    directories
}
