// Comment tree flattener.
//
// Turns the comment listing of a post's raw JSON into an ordered list of
// node and edge records. Traversal is depth-first with an explicit stack:
// a comment's records come before its replies', and siblings keep their
// listing order. Each reply links to its immediate parent comment.

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use redarchive_common::identity::day_bucket_id;
use redarchive_common::{json_path, IngestConfig, RedditUser};
use redarchive_store::{BlobStore, PostStore};

pub const POSTED: &str = "POSTED";
pub const POSTED_ON: &str = "POSTED_ON";
pub const COMMENTED_ON: &str = "COMMENTED_ON";
pub const REPLIED_TO: &str = "REPLIED_TO";
pub const HAS_REPLY: &str = "HAS_REPLY";

const COMMENT_LABELS: &[&str] = &["Reddit", "Entity", "Comment"];
const AUTHOR_LABELS: &[&str] = &["Reddit", "User", "Entity", "Account"];
const DATE_LABELS: &[&str] = &["Date"];

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphRecord {
    Node {
        labels: Vec<&'static str>,
        properties: Map<String, Value>,
    },
    Edge {
        label: &'static str,
        from: String,
        to: String,
        properties: Map<String, Value>,
    },
}

impl GraphRecord {
    pub fn id(&self) -> Option<&str> {
        match self {
            GraphRecord::Node { properties, .. } => properties.get("id")?.as_str(),
            GraphRecord::Edge { .. } => None,
        }
    }

    pub fn has_label(&self, wanted: &str) -> bool {
        match self {
            GraphRecord::Node { labels, .. } => labels.contains(&wanted),
            GraphRecord::Edge { label, .. } => *label == wanted,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("comment listing missing at {0}")]
    MissingListing(&'static str),

    #[error("comment {comment}: {problem}")]
    MalformedComment { comment: String, problem: String },
}

fn node(labels: &[&'static str], properties: Value) -> GraphRecord {
    GraphRecord::Node {
        labels: labels.to_vec(),
        properties: into_map(properties),
    }
}

fn edge(label: &'static str, from: &str, to: &str, properties: Value) -> GraphRecord {
    GraphRecord::Edge {
        label,
        from: from.to_string(),
        to: to.to_string(),
        properties: into_map(properties),
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Flatten the comment listing (the second element of a post's raw JSON).
/// Any structural problem fails the whole call; no partial output.
pub fn flatten(post_id: Uuid, raw: &Value) -> Result<Vec<GraphRecord>, FlattenError> {
    let top_level = raw
        .pointer("/1/data/children")
        .and_then(Value::as_array)
        .ok_or(FlattenError::MissingListing("[1].data.children"))?;

    let post_id = post_id.to_string();
    let mut records = Vec::new();

    // (listing child, immediate parent comment id)
    let mut stack: Vec<(&Value, Option<String>)> =
        top_level.iter().rev().map(|child| (child, None)).collect();

    while let Some((child, parent)) = stack.pop() {
        match child.get("kind").and_then(Value::as_str) {
            Some("t1") => {}
            Some("more") => {
                warn!(parent = parent.as_deref().unwrap_or("post"), "Hit a 'more' marker, not descending");
                continue;
            }
            other => {
                warn!(kind = other.unwrap_or("<none>"), "Skipping unknown listing kind");
                continue;
            }
        }

        let data = child.get("data").ok_or_else(|| FlattenError::MalformedComment {
            comment: "<unknown>".into(),
            problem: "missing data".into(),
        })?;
        let comment_id = emit_comment(&mut records, &post_id, data, parent.as_deref())?;

        let Some(replies) = data.get("replies").filter(|r| r.is_object()) else {
            continue;
        };
        if replies.get("kind").and_then(Value::as_str) == Some("more") {
            continue;
        }
        let children = replies
            .pointer("/data/children")
            .and_then(Value::as_array)
            .ok_or_else(|| FlattenError::MalformedComment {
                comment: comment_id.clone(),
                problem: "replies without children".into(),
            })?;
        for reply in children.iter().rev() {
            stack.push((reply, Some(comment_id.clone())));
        }
    }

    Ok(records)
}

/// Emit one comment's records and return its id.
fn emit_comment(
    records: &mut Vec<GraphRecord>,
    post_id: &str,
    data: &Value,
    parent: Option<&str>,
) -> Result<String, FlattenError> {
    let text = |key: &str| data.get(key).and_then(Value::as_str);

    let comment_id = text("id")
        .ok_or_else(|| FlattenError::MalformedComment {
            comment: "<unknown>".into(),
            problem: "missing id".into(),
        })?
        .to_string();
    let malformed = |problem: &str| FlattenError::MalformedComment {
        comment: comment_id.clone(),
        problem: problem.to_string(),
    };

    let body = text("body").ok_or_else(|| malformed("missing body"))?;
    let created_utc = data
        .get("created_utc")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("missing created_utc"))?;
    let created = DateTime::from_timestamp(created_utc as i64, 0)
        .ok_or_else(|| malformed("created_utc out of range"))?;

    let datetime = created.format(DATETIME_FORMAT).to_string();
    let day = created.format(DAY_FORMAT).to_string();
    let day_id = day_bucket_id(&day).to_string();
    let author = RedditUser::from_author(text("author"), text("author_fullname"));
    let author_id = author.id.to_string();

    records.push(node(
        COMMENT_LABELS,
        json!({ "id": comment_id, "body": body, "datetime": datetime }),
    ));
    records.push(node(
        AUTHOR_LABELS,
        json!({ "id": author_id, "author_name": author.name, "author_full_name": author.full_name }),
    ));
    records.push(node(DATE_LABELS, json!({ "id": day_id, "day": day })));

    records.push(edge(POSTED, &author_id, &comment_id, json!({ "datetime": datetime })));
    records.push(edge(POSTED_ON, &comment_id, &day_id, json!({})));
    records.push(edge(COMMENTED_ON, &comment_id, post_id, json!({ "datetime": datetime })));

    if let Some(parent) = parent {
        records.push(edge(REPLIED_TO, &comment_id, parent, json!({ "datetime": datetime })));
        records.push(edge(HAS_REPLY, parent, &comment_id, json!({ "datetime": datetime })));
    }

    Ok(comment_id)
}

/// Read a stored post's raw JSON blob and flatten its comments.
pub async fn extract_post_comments(
    blobs: &dyn BlobStore,
    store: &dyn PostStore,
    config: &IngestConfig,
    post_id: Uuid,
) -> Result<Vec<GraphRecord>> {
    let post = store
        .get_post(post_id)
        .await?
        .with_context(|| format!("Post {post_id} not found"))?;
    let path = post.fields.json_file_path.unwrap_or_else(|| json_path(post_id));

    let raw = blobs
        .read(&config.root_dir_name, &path)
        .await
        .with_context(|| format!("Failed to read {path}"))?;
    let document: Value = serde_json::from_slice(&raw).context("Post JSON is not valid JSON")?;

    let records = flatten(post_id, &document)
        .inspect_err(|e| error!(%post_id, "Comment flattening failed, nothing emitted: {e:#}"))
        .context("Failed to flatten comments")?;
    info!(%post_id, records = records.len(), "Flattened comments");
    Ok(records)
}
