//! DASH manifest handling for the video resolver.
//!
//! Parsing keeps only what stream selection needs: periods, their
//! adaptation sets, and each representation's bandwidth, MIME type and
//! `BaseURL`. The rewritten manifest is a minimal static MPD whose
//! `BaseURL`s point at blob-store paths.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

const MPD_NS: &str = "urn:mpeg:dash:schema:mpd:2011";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const MPD_PROFILE: &str = "urn:mpeg:dash:profile:isoff-on-demand:2011";
const MPD_SCHEMA_LOCATION: &str = "urn:mpeg:dash:schema:mpd:2011 DASH-MPD.xsd";

// --- Parsed manifest ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Mpd {
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Period {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@duration", default)]
    pub duration: Option<String>,
    #[serde(rename = "AdaptationSet", default)]
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdaptationSet {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@contentType", default)]
    pub content_type: Option<String>,
    #[serde(rename = "@mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Representation {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@bandwidth", default)]
    pub bandwidth: Option<String>,
    #[serde(rename = "@mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl AdaptationSet {
    /// `contentType` when present, otherwise the MIME type prefix of the set
    /// or of its first representation.
    pub fn media_kind(&self) -> Option<MediaKind> {
        let hint = self
            .content_type
            .as_deref()
            .or(self.mime_type.as_deref())
            .or_else(|| self.representations.first()?.mime_type.as_deref())?;

        if hint.starts_with("video") {
            Some(MediaKind::Video)
        } else if hint.starts_with("audio") {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

pub fn parse_manifest(xml: &str) -> Result<Mpd> {
    quick_xml::de::from_str(xml).context("Malformed DASH manifest")
}

// --- Stream selection ---

/// Which representation to keep from each adaptation set.
///
/// `Lowest` reproduces the historical archive. `Highest` keeps the best
/// quality stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BandwidthPolicy {
    #[default]
    Lowest,
    Highest,
}

impl FromStr for BandwidthPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lowest" => Ok(Self::Lowest),
            "highest" => Ok(Self::Highest),
            other => Err(format!("bandwidth policy must be lowest or highest, got {other}")),
        }
    }
}

impl fmt::Display for BandwidthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lowest => "lowest",
            Self::Highest => "highest",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedStream {
    pub representation_id: Option<String>,
    pub bandwidth: u64,
    pub mime_type: Option<String>,
    /// `BaseURL` as written in the source manifest.
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSelection {
    pub period_id: String,
    pub video: Option<SelectedStream>,
    pub audio: Option<SelectedStream>,
}

/// Pick one representation per adaptation set. Representations without a
/// numeric bandwidth or a `BaseURL` are not candidates. On equal bandwidth
/// the first in document order wins.
pub fn select_representation(set: &AdaptationSet, policy: BandwidthPolicy) -> Option<SelectedStream> {
    let mut best: Option<SelectedStream> = None;

    for rep in &set.representations {
        let Some(bandwidth) = rep.bandwidth.as_deref().and_then(|b| b.trim().parse::<u64>().ok()) else {
            continue;
        };
        let Some(base_url) = rep.base_url.as_deref().map(str::trim).filter(|b| !b.is_empty()) else {
            continue;
        };

        let better = match (&best, policy) {
            (None, _) => true,
            (Some(current), BandwidthPolicy::Lowest) => bandwidth < current.bandwidth,
            (Some(current), BandwidthPolicy::Highest) => bandwidth > current.bandwidth,
        };
        if better {
            best = Some(SelectedStream {
                representation_id: rep.id.clone(),
                bandwidth,
                mime_type: rep.mime_type.clone().or_else(|| set.mime_type.clone()),
                base_url: base_url.to_string(),
            });
        }
    }

    best
}

/// One selection per period, in document order. A period without an `id`
/// is numbered by its position.
pub fn select_streams(mpd: &Mpd, policy: BandwidthPolicy) -> Vec<PeriodSelection> {
    mpd.periods
        .iter()
        .enumerate()
        .map(|(index, period)| {
            let period_id = period
                .id
                .clone()
                .unwrap_or_else(|| index.to_string());
            let mut selection = PeriodSelection {
                period_id,
                video: None,
                audio: None,
            };

            for set in &period.adaptation_sets {
                let slot = match set.media_kind() {
                    Some(MediaKind::Video) => &mut selection.video,
                    Some(MediaKind::Audio) => &mut selection.audio,
                    None => continue,
                };
                if slot.is_some() {
                    warn!(
                        period = selection.period_id.as_str(),
                        set = set.id.as_deref().unwrap_or_default(),
                        "Extra adaptation set of the same kind ignored"
                    );
                    continue;
                }
                *slot = select_representation(set, policy);
                if let Some(stream) = slot {
                    info!(
                        period = selection.period_id.as_str(),
                        set = set.id.as_deref().unwrap_or_default(),
                        bandwidth = stream.bandwidth,
                        policy = %policy,
                        "Selected representation"
                    );
                }
            }
            selection
        })
        .collect()
}

// --- Paths ---

/// File name for a selected stream: the last path segment of its `BaseURL`.
fn file_name(base_url: &str) -> &str {
    let without_query = base_url.split(['?', '#']).next().unwrap_or(base_url);
    without_query
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(without_query)
}

pub fn video_segment_path(post_id: Uuid, period_id: &str, base_url: &str) -> String {
    format!("{post_id}/{period_id}_{}", file_name(base_url))
}

pub fn audio_segment_path(post_id: Uuid, period_id: &str, base_url: &str) -> String {
    format!("{post_id}/{period_id}-{}", file_name(base_url))
}

pub fn origin_manifest_path(post_id: Uuid) -> String {
    format!("{post_id}/Origin_DASH.mpd")
}

pub fn rewritten_manifest_path(post_id: Uuid) -> String {
    format!("{post_id}/Video_DASH.mpd")
}

/// Where to fetch a stream from. Relative `BaseURL`s hang off `media_root`.
pub fn source_url(media_root: &str, base_url: &str) -> String {
    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        return base_url.to_string();
    }
    format!(
        "{}/{}",
        media_root.trim_end_matches('/'),
        base_url.trim_start_matches('/')
    )
}

// --- Rewritten manifest ---

/// A stream as it will appear in the rewritten manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStream {
    pub mime_type: Option<String>,
    pub bandwidth: u64,
    /// Blob path, relative to the container.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPeriod {
    pub period_id: String,
    pub video: StoredStream,
    pub audio: Option<StoredStream>,
}

pub fn render_manifest(periods: &[StoredPeriod]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut mpd = BytesStart::new("MPD");
    mpd.push_attribute(("xmlns", MPD_NS));
    mpd.push_attribute(("xmlns:xsi", XSI_NS));
    mpd.push_attribute(("profiles", MPD_PROFILE));
    mpd.push_attribute(("type", "static"));
    mpd.push_attribute(("xsi:schemaLocation", MPD_SCHEMA_LOCATION));
    writer.write_event(Event::Start(mpd))?;

    for period in periods {
        let mut start = BytesStart::new("Period");
        start.push_attribute(("id", period.period_id.as_str()));
        writer.write_event(Event::Start(start))?;

        write_adaptation_set(&mut writer, "video", &period.period_id, &period.video)?;
        if let Some(audio) = &period.audio {
            write_adaptation_set(&mut writer, "audio", &period.period_id, audio)?;
        }

        writer.write_event(Event::End(BytesEnd::new("Period")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("MPD")))?;
    String::from_utf8(writer.into_inner()).context("Rendered manifest is not UTF-8")
}

fn write_adaptation_set(
    writer: &mut Writer<Vec<u8>>,
    content_type: &str,
    period_id: &str,
    stream: &StoredStream,
) -> Result<()> {
    let mut set = BytesStart::new("AdaptationSet");
    set.push_attribute(("contentType", content_type));
    set.push_attribute(("id", period_id));
    writer.write_event(Event::Start(set))?;

    let bandwidth = stream.bandwidth.to_string();
    let mut rep = BytesStart::new("Representation");
    rep.push_attribute(("id", period_id));
    rep.push_attribute(("bandwidth", bandwidth.as_str()));
    if let Some(mime) = &stream.mime_type {
        rep.push_attribute(("mimeType", mime.as_str()));
    }
    writer.write_event(Event::Start(rep))?;

    writer.write_event(Event::Start(BytesStart::new("BaseURL")))?;
    writer.write_event(Event::Text(BytesText::new(&stream.path)))?;
    writer.write_event(Event::End(BytesEnd::new("BaseURL")))?;

    writer.write_event(Event::End(BytesEnd::new("Representation")))?;
    writer.write_event(Event::End(BytesEnd::new("AdaptationSet")))?;
    Ok(())
}
