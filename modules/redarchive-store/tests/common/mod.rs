//! Scenarios every `PostStore` backend must pass.

use std::collections::HashSet;

use serde_json::json;
use uuid::Uuid;

use redarchive_common::{
    derive_id, derive_post_id, ContentRecord, ContentType, ListingEntry, Post, SpatialLabel,
    StaticFileType, UNASSIGNED_SLOT_ID,
};
use redarchive_store::{PostStore, StoreError};

pub fn post(native_id: &str, kind: &str, timestamp_ms: i64) -> Post {
    Post::from_listing(&ListingEntry {
        native_id: native_id.into(),
        subreddit: Some("test".into()),
        permalink: format!("/r/test/comments/{native_id}/title/"),
        title: format!("Post {native_id}"),
        timestamp_ms,
        author: Some("someone".into()),
        author_fullname: Some("t2_abc123".into()),
        kind: Some(kind.into()),
    })
}

fn label(label_id: &str, post_id: Uuid) -> SpatialLabel {
    SpatialLabel {
        label_id: label_id.into(),
        post_id,
        geometry: "POINT (30.5 50.45)".into(),
        comment: Some("checked".into()),
    }
}

pub async fn dedup_lookup(store: &dyn PostStore) {
    let a = post("thing_t3_a", "image", 1_741_963_920_000);
    let b = post("thing_t3_b", "image", 1_741_963_921_000);
    let c = post("thing_t3_c", "video", 1_741_963_922_000);
    for p in [&a, &b, &c] {
        store.insert_post(p).await.unwrap();
    }

    let d = derive_post_id("thing_t3_d");
    let found = store.existing_ids(&[a.id, b.id, d]).await.unwrap();
    assert_eq!(found, HashSet::from([a.id, b.id]));

    assert!(store.existing_ids(&[]).await.unwrap().is_empty());

    let loaded = store.get_post(c.id).await.unwrap().expect("post stored");
    assert_eq!(loaded, c);
    assert!(store.get_post(d).await.unwrap().is_none());
}

pub async fn duplicate_insert_is_an_error(store: &dyn PostStore) {
    let a = post("thing_t3_dup", "image", 1_741_963_920_000);
    store.insert_post(&a).await.unwrap();
    let err = store.insert_post(&a).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
}

pub async fn slot_resolution(store: &dyn PostStore) {
    let video = post("thing_t3_video", "video", 1_741_963_920_000);
    let image = post("thing_t3_image", "image", 1_741_963_920_000);
    store.insert_post(&video).await.unwrap();
    store.insert_post(&image).await.unwrap();

    let pending = store
        .posts_with_unresolved_slot(None, StaticFileType::Video)
        .await
        .unwrap();
    assert_eq!(pending.iter().map(|p| p.id).collect::<Vec<_>>(), vec![video.id]);

    let restricted = store
        .posts_with_unresolved_slot(Some(&[image.id][..]), StaticFileType::Video)
        .await
        .unwrap();
    assert!(restricted.is_empty());

    let path = format!("{}/Video_DASH.mpd", video.id);
    let content_id = derive_id(&path);
    let content = ContentRecord {
        id: content_id,
        source: video.id,
        kind: ContentType::VideoDashStream,
        created_date: video.created_date,
        storage_path: path.clone(),
        fields: json!({ "periods": [] }),
    };
    assert_eq!(store.insert_content(&content).await.unwrap(), 1);
    assert_eq!(store.insert_content(&content).await.unwrap(), 0);
    assert_eq!(store.get_content(content_id).await.unwrap(), Some(content));

    let updated = store
        .update_post_static_slot(video.id, StaticFileType::Video, UNASSIGNED_SLOT_ID, content_id, &path)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let again = store
        .update_post_static_slot(video.id, StaticFileType::Video, UNASSIGNED_SLOT_ID, content_id, &path)
        .await
        .unwrap();
    assert_eq!(again, 0);

    let missing = store
        .update_post_static_slot(Uuid::new_v4(), StaticFileType::Video, UNASSIGNED_SLOT_ID, content_id, &path)
        .await
        .unwrap();
    assert_eq!(missing, 0);

    let resolved = store.get_post(video.id).await.unwrap().unwrap();
    assert!(resolved.fields.static_downloaded_flag);
    assert_eq!(resolved.fields.static_files[0].id, content_id.to_string());
    assert_eq!(resolved.fields.static_files[0].path.as_deref(), Some(path.as_str()));

    assert!(store
        .posts_with_unresolved_slot(None, StaticFileType::Video)
        .await
        .unwrap()
        .is_empty());
}

pub async fn label_lifecycle(store: &dyn PostStore) {
    let a = post("thing_t3_la", "image", 1_741_963_920_000);
    let b = post("thing_t3_lb", "image", 1_741_963_921_000);
    store.insert_post(&a).await.unwrap();
    store.insert_post(&b).await.unwrap();

    assert_eq!(store.unlabeled_posts().await.unwrap().len(), 2);

    let inserted = store
        .add_labels(&[label("label001", a.id), label("label002", a.id)])
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let unlabeled = store.unlabeled_posts().await.unwrap();
    assert_eq!(unlabeled.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b.id]);

    let joined = store.posts_with_labels().await.unwrap();
    assert_eq!(joined.len(), 2);
    assert!(joined.iter().all(|pl| pl.post.id == a.id && pl.label.post_id == a.id));

    let replaced = store
        .replace_post_labels(a.id, &[label("label003", a.id)])
        .await
        .unwrap();
    assert_eq!(replaced, 1);
    let labels = store.labels_for_post(a.id).await.unwrap();
    assert_eq!(labels.iter().map(|l| l.label_id.as_str()).collect::<Vec<_>>(), vec!["label003"]);

    assert_eq!(store.remove_label("label003").await.unwrap(), 1);
    assert_eq!(store.remove_label("label003").await.unwrap(), 0);
    assert!(store.labels_for_post(a.id).await.unwrap().is_empty());
}

pub async fn invalid_labels_are_rejected(store: &dyn PostStore) {
    let a = post("thing_t3_bad", "image", 1_741_963_920_000);
    store.insert_post(&a).await.unwrap();

    let mut bad = label("label009", a.id);
    bad.geometry = "not a geometry".into();
    let err = store.add_labels(&[label("label008", a.id), bad]).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    assert!(store.labels_for_post(a.id).await.unwrap().is_empty());
}

pub async fn post_with_content_commits_together(store: &dyn PostStore) {
    let a = post("thing_t3_pair", "video", 1_741_963_920_000);
    let path = format!("{}/Graph_DASH.mpd", a.id);
    let content = ContentRecord {
        id: derive_id(&path),
        source: a.id,
        kind: ContentType::VideoDashStream,
        created_date: a.created_date,
        storage_path: path,
        fields: json!({}),
    };
    store.insert_post_with_content(&a, &content).await.unwrap();
    assert_eq!(store.get_post(a.id).await.unwrap(), Some(a.clone()));
    assert_eq!(store.get_content(content.id).await.unwrap(), Some(content.clone()));

    // Content id clash: the post row must roll back with it.
    let b = post("thing_t3_clash", "video", 1_741_963_921_000);
    let clash = ContentRecord {
        source: b.id,
        ..content.clone()
    };
    assert!(store.insert_post_with_content(&b, &clash).await.is_err());
    assert!(store.get_post(b.id).await.unwrap().is_none());
    assert_eq!(store.get_content(content.id).await.unwrap(), Some(content));
}
