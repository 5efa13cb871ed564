//! Video resolver scenarios: two-period manifest, re-runs, and failures
//! that must leave the slot unresolved.

use redarchive_common::{
    derive_id, json_path, ContentType, Post, StaticFileType, UNASSIGNED_SLOT_ID,
};
use redarchive_scout::manifest::{parse_manifest, BandwidthPolicy};
use redarchive_scout::testing::{
    listing_entry, raw_post_json, test_config, MemoryPostStore, MockBlobStore, MockMediaFetcher,
    CONTAINER,
};
use redarchive_scout::video::{Resolution, VideoResolver};
use uuid::Uuid;

const MEDIA_ROOT: &str = "https://v.redd.it/abc123";
const DASH_URL: &str = "https://v.redd.it/abc123/DASHPlaylist.mpd?a=1&v=1";

const TWO_PERIOD_MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT40S" minBufferTime="PT1.500S" profiles="urn:mpeg:dash:profile:isoff-on-demand:2011" type="static" xmlns="urn:mpeg:dash:schema:mpd:2011">
  <Period duration="PT20S" id="0">
    <AdaptationSet contentType="video" id="0">
      <Representation bandwidth="1148361" id="3" mimeType="video/mp4"><BaseURL>DASH_720.mp4</BaseURL></Representation>
      <Representation bandwidth="280951" id="1" mimeType="video/mp4"><BaseURL>DASH_270.mp4</BaseURL></Representation>
    </AdaptationSet>
    <AdaptationSet contentType="audio" id="1">
      <Representation bandwidth="130539" id="5" mimeType="audio/mp4"><BaseURL>DASH_AUDIO_128.mp4</BaseURL></Representation>
      <Representation bandwidth="69284" id="4" mimeType="audio/mp4"><BaseURL>DASH_AUDIO_64.mp4</BaseURL></Representation>
    </AdaptationSet>
  </Period>
  <Period duration="PT20S" id="1">
    <AdaptationSet contentType="video" id="0">
      <Representation bandwidth="542310" id="2" mimeType="video/mp4"><BaseURL>P1_DASH_480.mp4</BaseURL></Representation>
      <Representation bandwidth="280951" id="1" mimeType="video/mp4"><BaseURL>P1_DASH_270.mp4</BaseURL></Representation>
    </AdaptationSet>
    <AdaptationSet contentType="audio" id="1">
      <Representation bandwidth="69284" id="4" mimeType="audio/mp4"><BaseURL>P1_DASH_AUDIO_64.mp4</BaseURL></Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

/// A video post whose JSON blob names the two-period manifest.
fn video_post() -> (Post, MockBlobStore) {
    let post = Post::from_listing(&listing_entry("thing_t3_vid", "video"));
    let raw = raw_post_json(
        "/r/test/comments/vid/post_vid/",
        Some(MEDIA_ROOT),
        Some(DASH_URL),
        vec![],
    );
    let blobs = MockBlobStore::new().with_blob(CONTAINER, &json_path(post.id), raw.to_string());
    (post, blobs)
}

fn full_fetcher() -> MockMediaFetcher {
    MockMediaFetcher::new()
        .on_url(DASH_URL, TWO_PERIOD_MPD)
        .on_url(&format!("{MEDIA_ROOT}/DASH_270.mp4"), "v0-low")
        .on_url(&format!("{MEDIA_ROOT}/DASH_720.mp4"), "v0-high")
        .on_url(&format!("{MEDIA_ROOT}/DASH_AUDIO_64.mp4"), "a0-low")
        .on_url(&format!("{MEDIA_ROOT}/DASH_AUDIO_128.mp4"), "a0-high")
        .on_url(&format!("{MEDIA_ROOT}/P1_DASH_270.mp4"), "v1-low")
        .on_url(&format!("{MEDIA_ROOT}/P1_DASH_480.mp4"), "v1-high")
        .on_url(&format!("{MEDIA_ROOT}/P1_DASH_AUDIO_64.mp4"), "a1-low")
}

#[tokio::test]
async fn two_period_manifest_resolves_one_slot() {
    let (post, blobs) = video_post();
    let id = post.id;
    let store = MemoryPostStore::new().with_post(post);
    let fetcher = full_fetcher();
    let config = test_config();

    let report = VideoResolver::new(&blobs, &store, &fetcher, &config)
        .run(None)
        .await
        .unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.resolved, vec![id]);
    assert!(report.failed.is_empty());

    // Exactly one content row, keyed by the rewritten manifest path.
    let manifest_path = format!("{id}/Video_DASH.mpd");
    let contents = store.contents();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].id, derive_id(&manifest_path));
    assert_eq!(contents[0].source, id);
    assert_eq!(contents[0].kind, ContentType::VideoDashStream);
    assert_eq!(contents[0].storage_path, manifest_path);
    assert_eq!(contents[0].fields["dash_url"], DASH_URL);

    // Exactly one slot, now resolved.
    let stored = store.post(id).unwrap();
    assert_eq!(stored.fields.static_files.len(), 1);
    let slot = &stored.fields.static_files[0];
    assert_eq!(slot.kind, StaticFileType::Video);
    assert_eq!(slot.id, contents[0].id.to_string());
    assert_eq!(slot.path.as_deref(), Some(manifest_path.as_str()));
    assert!(stored.fields.static_downloaded_flag);

    // Origin manifest stored verbatim; lowest-bandwidth segments uploaded.
    let origin = blobs.get(CONTAINER, &format!("{id}/Origin_DASH.mpd")).unwrap();
    assert_eq!(&origin.bytes[..], TWO_PERIOD_MPD.as_bytes());
    assert_eq!(&blobs.get(CONTAINER, &format!("{id}/0_DASH_270.mp4")).unwrap().bytes[..], b"v0-low");
    assert_eq!(&blobs.get(CONTAINER, &format!("{id}/0-DASH_AUDIO_64.mp4")).unwrap().bytes[..], b"a0-low");
    assert_eq!(&blobs.get(CONTAINER, &format!("{id}/1_P1_DASH_270.mp4")).unwrap().bytes[..], b"v1-low");
    assert_eq!(
        blobs.get(CONTAINER, &format!("{id}/1-P1_DASH_AUDIO_64.mp4")).unwrap().content_type.as_deref(),
        Some("audio/mp4")
    );

    // Rewritten manifest points at destination paths, never at the source.
    let rewritten = blobs.get(CONTAINER, &manifest_path).unwrap();
    let mpd = parse_manifest(std::str::from_utf8(&rewritten.bytes).unwrap()).unwrap();
    let base_urls: Vec<String> = mpd
        .periods
        .iter()
        .flat_map(|p| &p.adaptation_sets)
        .flat_map(|s| &s.representations)
        .filter_map(|r| r.base_url.clone())
        .collect();
    assert_eq!(
        base_urls,
        vec![
            format!("{id}/0_DASH_270.mp4"),
            format!("{id}/0-DASH_AUDIO_64.mp4"),
            format!("{id}/1_P1_DASH_270.mp4"),
            format!("{id}/1-P1_DASH_AUDIO_64.mp4"),
        ]
    );
    assert!(base_urls.iter().all(|u| !u.contains("v.redd.it")));
}

#[tokio::test]
async fn highest_policy_fetches_best_streams() {
    let (post, blobs) = video_post();
    let id = post.id;
    let store = MemoryPostStore::new().with_post(post);
    let fetcher = full_fetcher();
    let config = test_config();

    VideoResolver::new(&blobs, &store, &fetcher, &config)
        .with_policy(BandwidthPolicy::Highest)
        .run(None)
        .await
        .unwrap();

    assert_eq!(&blobs.get(CONTAINER, &format!("{id}/0_DASH_720.mp4")).unwrap().bytes[..], b"v0-high");
    assert_eq!(&blobs.get(CONTAINER, &format!("{id}/1_P1_DASH_480.mp4")).unwrap().bytes[..], b"v1-high");
}

#[tokio::test]
async fn resolved_post_is_not_selected_again() {
    let (post, blobs) = video_post();
    let store = MemoryPostStore::new().with_post(post);
    let fetcher = full_fetcher();
    let config = test_config();
    let resolver = VideoResolver::new(&blobs, &store, &fetcher, &config);

    let first = resolver.run(None).await.unwrap();
    assert_eq!(first.resolved.len(), 1);
    let fetches = fetcher.fetched().len();

    let second = resolver.run(None).await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(fetcher.fetched().len(), fetches);
    assert_eq!(store.contents().len(), 1);
}

#[tokio::test]
async fn failed_segment_leaves_slot_unresolved_for_retry() {
    let (post, blobs) = video_post();
    let id = post.id;
    let store = MemoryPostStore::new().with_post(post);
    let config = test_config();

    // Period 1 audio is missing from the fetcher.
    let partial = MockMediaFetcher::new()
        .on_url(DASH_URL, TWO_PERIOD_MPD)
        .on_url(&format!("{MEDIA_ROOT}/DASH_270.mp4"), "v0-low")
        .on_url(&format!("{MEDIA_ROOT}/DASH_AUDIO_64.mp4"), "a0-low")
        .on_url(&format!("{MEDIA_ROOT}/P1_DASH_270.mp4"), "v1-low");

    let report = VideoResolver::new(&blobs, &store, &partial, &config)
        .run(None)
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(store.contents().is_empty());
    let stored = store.post(id).unwrap();
    assert_eq!(stored.fields.static_files[0].id, UNASSIGNED_SLOT_ID);

    // A later run with the segment available completes the post.
    let report = VideoResolver::new(&blobs, &store, &full_fetcher(), &config)
        .run(None)
        .await
        .unwrap();
    assert_eq!(report.resolved, vec![id]);
    assert_eq!(store.contents().len(), 1);
}

#[tokio::test]
async fn post_without_hosted_video_is_reported() {
    let post = Post::from_listing(&listing_entry("thing_t3_novid", "video"));
    let id = post.id;
    let raw = raw_post_json("/r/test/comments/novid/post_novid/", None, None, vec![]);
    let blobs = MockBlobStore::new().with_blob(CONTAINER, &json_path(id), raw.to_string());
    let store = MemoryPostStore::new().with_post(post.clone());
    let fetcher = MockMediaFetcher::new();
    let config = test_config();

    let resolver = VideoResolver::new(&blobs, &store, &fetcher, &config);
    assert_eq!(resolver.resolve_post(&post).await.unwrap(), Resolution::NoHostedVideo);

    let report = resolver.run(None).await.unwrap();
    assert_eq!(report.no_video, vec![id]);
    assert!(fetcher.fetched().is_empty());
}

#[tokio::test]
async fn run_can_be_restricted_to_ids() {
    let (post, blobs) = video_post();
    let store = MemoryPostStore::new().with_post(post);
    let fetcher = full_fetcher();
    let config = test_config();

    let other = [Uuid::new_v4()];
    let report = VideoResolver::new(&blobs, &store, &fetcher, &config)
        .run(Some(&other[..]))
        .await
        .unwrap();
    assert_eq!(report.candidates, 0);
    assert!(fetcher.fetched().is_empty());
}
