// Video resolver.
//
// Second pass over stored posts that carry an unresolved REDDIT_VIDEO slot.
// For each one: read its raw JSON blob, fetch the DASH manifest it names,
// fetch the selected segments, upload everything, rewrite the manifest to
// point at the uploads, then record one content row and resolve the slot.
// A post that fails anywhere keeps its slot unresolved and is picked up
// again by the next run.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use redarchive_common::{
    day_start_ms, derive_id, json_path, ContentRecord, ContentType, IngestConfig, Post,
    StaticFileType, UNASSIGNED_SLOT_ID,
};
use redarchive_store::{BlobStore, PostStore, UploadOptions};

use crate::manifest::{
    audio_segment_path, origin_manifest_path, parse_manifest, render_manifest,
    rewritten_manifest_path, select_streams, source_url, video_segment_path, BandwidthPolicy,
    SelectedStream, StoredPeriod, StoredStream,
};
use crate::traits::MediaFetcher;

const DASH_CONTENT_TYPE: &str = "application/dash+xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { content_id: Uuid, path: String },
    /// The post JSON names no hosted video; the slot stays unresolved.
    NoHostedVideo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    pub candidates: usize,
    pub resolved: Vec<Uuid>,
    pub no_video: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

pub struct VideoResolver<'a> {
    blobs: &'a dyn BlobStore,
    store: &'a dyn PostStore,
    fetcher: &'a dyn MediaFetcher,
    config: &'a IngestConfig,
    policy: BandwidthPolicy,
}

impl<'a> VideoResolver<'a> {
    pub fn new(
        blobs: &'a dyn BlobStore,
        store: &'a dyn PostStore,
        fetcher: &'a dyn MediaFetcher,
        config: &'a IngestConfig,
    ) -> Self {
        Self {
            blobs,
            store,
            fetcher,
            config,
            policy: BandwidthPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BandwidthPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve every post with an unresolved video slot, optionally limited
    /// to `ids`. Only the selection query can fail the run.
    pub async fn run(&self, ids: Option<&[Uuid]>) -> Result<ResolveReport> {
        let posts = self
            .store
            .posts_with_unresolved_slot(ids, StaticFileType::Video)
            .await
            .context("Failed to select posts with unresolved video")?;

        let mut report = ResolveReport {
            candidates: posts.len(),
            ..Default::default()
        };
        info!(posts = posts.len(), policy = %self.policy, "Resolving videos");

        for (i, post) in posts.iter().enumerate() {
            if i > 0 {
                self.config.politeness.pause().await;
            }
            info!(post_id = %post.id, "Resolving video");

            match self.resolve_post(post).await {
                Ok(Resolution::Resolved { content_id, path }) => {
                    info!(post_id = %post.id, %content_id, path = path.as_str(), "Video resolved");
                    report.resolved.push(post.id);
                }
                Ok(Resolution::NoHostedVideo) => {
                    warn!(post_id = %post.id, "Post JSON has no hosted video, leaving slot unresolved");
                    report.no_video.push(post.id);
                }
                Err(e) => {
                    error!(post_id = %post.id, "Video resolution failed: {e:#}");
                    report.failed.push((post.id, format!("{e:#}")));
                }
            }
        }

        info!(
            candidates = report.candidates,
            resolved = report.resolved.len(),
            no_video = report.no_video.len(),
            failed = report.failed.len(),
            "Video resolution finished"
        );
        Ok(report)
    }

    pub async fn resolve_post(&self, post: &Post) -> Result<Resolution> {
        let container = self.config.root_dir_name.as_str();
        let json_blob = post
            .fields
            .json_file_path
            .clone()
            .unwrap_or_else(|| json_path(post.id));

        let raw = self
            .blobs
            .read(container, &json_blob)
            .await
            .with_context(|| format!("Failed to read {json_blob}"))?;
        let document: Value = serde_json::from_slice(&raw).context("Post JSON is not valid JSON")?;

        let post_data = document
            .pointer("/0/data/children/0/data")
            .context("Post JSON has no post listing")?;
        let Some(reddit_video) = post_data.pointer("/secure_media/reddit_video") else {
            return Ok(Resolution::NoHostedVideo);
        };
        let dash_url = reddit_video
            .get("dash_url")
            .and_then(Value::as_str)
            .context("reddit_video has no dash_url")?;
        let media_root = media_root(post_data, dash_url);

        // --- Manifest ---
        let origin = self
            .fetcher
            .fetch(dash_url)
            .await
            .context("Failed to fetch DASH manifest")?;
        let origin_xml = std::str::from_utf8(&origin).context("DASH manifest is not UTF-8")?;
        let mpd = parse_manifest(origin_xml)?;
        let selections = select_streams(&mpd, self.policy);
        if selections.iter().all(|p| p.video.is_none()) {
            bail!("DASH manifest has no usable video representation");
        }

        self.upload(origin.clone(), &origin_manifest_path(post.id), DASH_CONTENT_TYPE)
            .await?;

        // --- Segments ---
        let mut stored = Vec::new();
        for selection in &selections {
            let Some(video) = &selection.video else {
                warn!(post_id = %post.id, period = selection.period_id.as_str(), "Period has no video, skipped");
                continue;
            };

            let video_path = video_segment_path(post.id, &selection.period_id, &video.base_url);
            let stored_video = self.store_stream(&media_root, video, &video_path).await?;

            let stored_audio = match &selection.audio {
                Some(audio) => {
                    let audio_path =
                        audio_segment_path(post.id, &selection.period_id, &audio.base_url);
                    Some(self.store_stream(&media_root, audio, &audio_path).await?)
                }
                None => None,
            };

            stored.push(StoredPeriod {
                period_id: selection.period_id.clone(),
                video: stored_video,
                audio: stored_audio,
            });
        }

        // --- Rewritten manifest ---
        let rewritten = render_manifest(&stored)?;
        let manifest_path = self
            .upload(
                Bytes::from(rewritten),
                &rewritten_manifest_path(post.id),
                DASH_CONTENT_TYPE,
            )
            .await?;

        // --- Rows ---
        let content_id = derive_id(&rewritten_manifest_path(post.id));
        let content = ContentRecord {
            id: content_id,
            source: post.id,
            kind: ContentType::VideoDashStream,
            created_date: day_start_ms(post.created_date),
            storage_path: manifest_path.clone(),
            fields: reddit_video.clone(),
        };
        let inserted = self
            .store
            .insert_content(&content)
            .await
            .context("Content insert failed")?;
        if inserted == 0 {
            info!(post_id = %post.id, %content_id, "Content row already present from an earlier attempt");
        }

        let updated = self
            .store
            .update_post_static_slot(
                post.id,
                StaticFileType::Video,
                UNASSIGNED_SLOT_ID,
                content_id,
                &manifest_path,
            )
            .await
            .context("Slot update failed")?;
        if updated != 1 {
            bail!("Expected to resolve exactly one video slot, updated {updated}");
        }

        Ok(Resolution::Resolved {
            content_id,
            path: manifest_path,
        })
    }

    async fn store_stream(
        &self,
        media_root: &str,
        stream: &SelectedStream,
        path: &str,
    ) -> Result<StoredStream> {
        let url = source_url(media_root, &stream.base_url);
        info!(url, path, bandwidth = stream.bandwidth, "Fetching segment");

        self.config.politeness.pause().await;
        let bytes = self
            .fetcher
            .fetch(&url)
            .await
            .with_context(|| format!("Failed to fetch segment {url}"))?;

        let content_type = stream
            .mime_type
            .as_deref()
            .unwrap_or(self.config.content_type.as_str());
        let stored_path = self.upload(bytes, path, content_type).await?;

        Ok(StoredStream {
            mime_type: stream.mime_type.clone(),
            bandwidth: stream.bandwidth,
            path: stored_path,
        })
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
            .await
            .with_context(|| format!("Failed to upload {path}"))?;
        Ok(stored)
    }
}

/// Base for relative `BaseURL`s: the post's media URL when the JSON has one,
/// otherwise the directory holding the manifest.
fn media_root(post_data: &Value, dash_url: &str) -> String {
    if let Some(url) = post_data.get("url").and_then(Value::as_str) {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
    }
    let without_query = dash_url.split('?').next().unwrap_or(dash_url);
    match without_query.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => without_query.to_string(),
    }
}
