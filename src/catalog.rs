//! Turns the engine's raw format list into the catalog offered to clients.
//!
//! The raw list is walked in engine order. A variant is offered only when it
//! carries a video track in a browser-friendly container; among qualifying
//! variants the first occurrence of an identifier wins. Nothing here reads
//! the clock or any other ambient state, so the same input always yields the
//! same catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Containers the landing page can play back directly.
const OFFERED_CONTAINERS: &[&str] = &["mp4", "webm"];

const UNKNOWN_LABEL: &str = "unknown";

/// One entry of the engine's `formats` array. Only the fields the catalog
/// needs are read; everything is optional because the engine omits fields
/// freely.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawVariant {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
}

/// Client-facing description of one downloadable variant. `itag` is the
/// token the client echoes back to `/api/download`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatVariant {
    #[serde(rename = "itag")]
    pub id: String,
    #[serde(rename = "quality_label")]
    pub label: String,
    #[serde(rename = "extension", alias = "ext")]
    pub container: String,
    pub has_audio: bool,
    pub has_video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

/// Ordered variants from a single listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatCatalog {
    variants: Vec<FormatVariant>,
}

impl FormatCatalog {
    pub fn variants(&self) -> &[FormatVariant] {
        &self.variants
    }

    pub fn into_variants(self) -> Vec<FormatVariant> {
        self.variants
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn get(&self, id: &str) -> Option<&FormatVariant> {
        self.variants.iter().find(|variant| variant.id == id)
    }
}

/// Deduplicates and normalizes `raw` into a catalog.
pub fn build<'a, I>(raw: I) -> FormatCatalog
where
    I: IntoIterator<Item = &'a RawVariant>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut variants = Vec::new();

    for entry in raw {
        let Some(id) = entry
            .format_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        let Some(container) = entry
            .ext
            .as_deref()
            .filter(|ext| OFFERED_CONTAINERS.contains(ext))
        else {
            continue;
        };
        if !carries_video(entry) || seen.contains(id) {
            continue;
        }

        seen.insert(id.to_owned());
        variants.push(FormatVariant {
            id: id.to_owned(),
            label: quality_label(entry),
            container: container.to_owned(),
            has_audio: carries_audio(entry),
            has_video: true,
            filesize: entry.filesize.or(entry.filesize_approx),
        });
    }

    FormatCatalog { variants }
}

fn codec_present(codec: Option<&str>) -> Option<bool> {
    codec.map(|codec| {
        let codec = codec.trim();
        !codec.is_empty() && !codec.eq_ignore_ascii_case("none")
    })
}

/// An absent `vcodec` still counts when the engine reports a frame height.
fn carries_video(entry: &RawVariant) -> bool {
    codec_present(entry.vcodec.as_deref()).unwrap_or(entry.height.is_some())
}

fn carries_audio(entry: &RawVariant) -> bool {
    codec_present(entry.acodec.as_deref()).unwrap_or(false)
}

fn quality_label(entry: &RawVariant) -> String {
    if let Some(note) = entry
        .format_note
        .as_deref()
        .map(str::trim)
        .filter(|note| !note.is_empty())
    {
        return note.to_owned();
    }
    match entry.height {
        Some(height) if height > 0 => format!("{height}p"),
        _ => UNKNOWN_LABEL.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, ext: &str, vcodec: &str, acodec: &str) -> RawVariant {
        RawVariant {
            format_id: Some(id.into()),
            format_note: None,
            ext: Some(ext.into()),
            height: Some(360),
            vcodec: Some(vcodec.into()),
            acodec: Some(acodec.into()),
            filesize: None,
            filesize_approx: None,
        }
    }

    #[test]
    fn duplicate_id_keeps_video_bearing_entry() {
        let raw = vec![
            variant("18", "mp4", "none", "mp4a.40.2"),
            variant("18", "mp4", "avc1.42001E", "mp4a.40.2"),
        ];
        let catalog = build(&raw);
        assert_eq!(catalog.len(), 1);
        let entry = catalog.get("18").unwrap();
        assert!(entry.has_video);
        assert!(entry.has_audio);
    }

    #[test]
    fn first_qualifying_occurrence_wins() {
        let mut first = variant("22", "mp4", "avc1", "mp4a");
        first.format_note = Some("720p".into());
        let mut second = variant("22", "mp4", "avc1", "none");
        second.format_note = Some("later".into());
        let catalog = build(&[first, second]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.variants()[0].label, "720p");
    }

    #[test]
    fn rebuilding_is_deterministic_and_unique() {
        let raw = vec![
            variant("137", "mp4", "avc1", "none"),
            variant("18", "mp4", "avc1", "mp4a"),
            variant("137", "mp4", "avc1", "none"),
            variant("248", "webm", "vp9", "none"),
            variant("140", "m4a", "none", "mp4a"),
        ];
        let first = build(&raw);
        let second = build(&raw);
        assert_eq!(first, second);
        let ids: Vec<_> = first.variants().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["137", "18", "248"]);
    }

    #[test]
    fn label_falls_back_to_height_then_unknown() {
        let mut noted = variant("1", "mp4", "avc1", "none");
        noted.format_note = Some("  1080p60 HDR ".into());
        let mut tall = variant("2", "mp4", "avc1", "none");
        tall.height = Some(480);
        let mut blank = variant("3", "webm", "vp9", "none");
        blank.height = None;
        blank.format_note = Some("   ".into());

        let catalog = build(&[noted, tall, blank]);
        let labels: Vec<_> = catalog.variants().iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["1080p60 HDR", "480p", "unknown"]);
    }

    #[test]
    fn unsupported_containers_and_missing_ids_are_skipped() {
        let mut no_id = variant("x", "mp4", "avc1", "mp4a");
        no_id.format_id = None;
        let storyboard = variant("sb0", "mhtml", "none", "none");
        let flv = variant("5", "flv", "h263", "mp3");
        assert!(build(&[no_id, storyboard, flv]).is_empty());
    }

    #[test]
    fn missing_vcodec_uses_height_hint() {
        let mut with_height = variant("a", "mp4", "avc1", "mp4a");
        with_height.vcodec = None;
        let mut without_height = variant("b", "mp4", "avc1", "mp4a");
        without_height.vcodec = None;
        without_height.height = None;
        let catalog = build(&[with_height, without_height]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.variants()[0].id, "a");
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let mut raw = variant("18", "mp4", "avc1", "mp4a");
        raw.filesize_approx = Some(2048);
        let catalog = build(&[raw]);
        let json = serde_json::to_value(catalog.variants()).unwrap();
        assert_eq!(json[0]["itag"], "18");
        assert_eq!(json[0]["quality_label"], "360p");
        assert_eq!(json[0]["extension"], "mp4");
        assert_eq!(json[0]["has_audio"], true);
        assert_eq!(json[0]["has_video"], true);
        assert_eq!(json[0]["filesize"], 2048);
    }
}
