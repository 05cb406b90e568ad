//! Video metadata: yt-dlp `--dump-json` parsing and variant ranking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::metrics;
use crate::core::validation::{sanitize_title, MediaLocator};
use crate::download::error::DownloadError;
use crate::download::extractor::MediaExtractor;
use crate::download::format_selector::{Resolution, VariantTag};
use crate::download::ytdlp_errors;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_DURATION: &str = "00:00";
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// The subset of the yt-dlp info document this service reads.
#[derive(Debug, Default, Deserialize)]
struct RawVideoInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration_string: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFormat {
    /// Audio-only formats carry `null`
    #[serde(default)]
    height: Option<f64>,
}

/// Response body of `/api/info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub thumbnail: String,
    /// Display string such as `"3:33"`
    pub duration: String,
    #[serde(rename = "channel")]
    pub uploader: String,
    pub view_count: u64,
    #[serde(rename = "formats")]
    pub variants: Vec<VariantTag>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Deduplicate raw heights into resolution tags, highest first, with the
/// audio variant always last.
pub fn rank_variants<I>(heights: I) -> Vec<VariantTag>
where
    I: IntoIterator<Item = u32>,
{
    let resolutions: BTreeSet<Resolution> = heights.into_iter().filter_map(Resolution::from_height_floor).collect();

    resolutions
        .into_iter()
        .rev()
        .map(VariantTag::Video)
        .chain(std::iter::once(VariantTag::Audio))
        .collect()
}

/// Parse a complete `--dump-json` document.
pub fn parse_metadata(document: &[u8]) -> Result<VideoMetadata, DownloadError> {
    let raw: RawVideoInfo = serde_json::from_slice(document).map_err(|e| {
        log::error!("Failed to parse yt-dlp metadata: {}", e);
        DownloadError::Malformed(e.to_string())
    })?;

    let heights = raw
        .formats
        .unwrap_or_default()
        .into_iter()
        .filter_map(|f| f.height)
        .filter(|h| h.is_finite() && *h >= 0.0)
        .map(|h| h as u32);

    Ok(VideoMetadata {
        variants: rank_variants(heights),
        title: non_empty(raw.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        thumbnail: raw.thumbnail.unwrap_or_default(),
        duration: non_empty(raw.duration_string).unwrap_or_else(|| UNKNOWN_DURATION.to_string()),
        uploader: non_empty(raw.uploader).unwrap_or_else(|| UNKNOWN_CHANNEL.to_string()),
        view_count: raw.view_count.unwrap_or(0),
    })
}

/// Run the metadata dump and parse it.
pub async fn fetch_metadata(
    extractor: &dyn MediaExtractor,
    locator: &MediaLocator,
) -> Result<VideoMetadata, DownloadError> {
    log::info!("Fetching info for: {}", locator);

    let result = match extractor.dump_metadata(locator).await {
        Ok(document) => parse_metadata(&document),
        Err(e) => {
            if let Some(stderr) = e.stderr() {
                ytdlp_errors::log_classified_failure("Metadata dump", stderr);
            } else {
                log::error!("Metadata dump failed for {}: {}", locator, e);
            }
            Err(e)
        }
    };

    let label = match &result {
        Ok(_) => "success",
        Err(e) => e.subcategory(),
    };
    metrics::METADATA_REQUESTS_TOTAL.with_label_values(&[label]).inc();

    if let Ok(meta) = &result {
        let labels: Vec<String> = meta.variants.iter().map(VariantTag::label).collect();
        log::info!("Available formats for {}: {:?}", locator, labels);
    }
    result
}

/// Best-effort filename stem for an attachment.
///
/// Any lookup failure, or a title that sanitizes to nothing, yields `fallback`.
pub async fn resolve_filename_stem(extractor: &dyn MediaExtractor, locator: &MediaLocator, fallback: &str) -> String {
    match extractor.get_title(locator).await {
        Ok(title) => {
            let stem = sanitize_title(&title);
            if stem.is_empty() {
                log::debug!("Title {:?} sanitized to nothing, using {:?}", title, fallback);
                fallback.to_string()
            } else {
                stem
            }
        }
        Err(e) => {
            log::warn!("Title lookup failed for {}, using {:?}: {}", locator, fallback, e);
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validation::validate_locator;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::process::Child;

    use crate::download::format_selector::FormatSelection;

    fn tags(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn labels(variants: &[VariantTag]) -> Vec<String> {
        variants.iter().map(VariantTag::label).collect()
    }

    #[test]
    fn test_rank_variants_scenario() {
        let ranked = rank_variants(vec![144, 360, 720, 1080]);
        assert_eq!(labels(&ranked), tags(&["1080p", "720p", "360p", "144p", "mp3"]));
    }

    #[test]
    fn test_rank_variants_dedup_and_floor() {
        let ranked = rank_variants(vec![1080, 1080, 1920, 4320, 240, 100, 480, 2000]);
        assert_eq!(labels(&ranked), tags(&["2160p", "1440p", "1080p", "360p", "144p", "mp3"]));
    }

    #[test]
    fn test_rank_variants_empty_still_offers_audio() {
        assert_eq!(rank_variants(Vec::new()), vec![VariantTag::Audio]);
        assert_eq!(rank_variants(vec![50, 143]), vec![VariantTag::Audio]);
    }

    #[test]
    fn test_parse_full_document() {
        let doc = br#"{
            "title": "Never Gonna Give You Up",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "duration_string": "3:33",
            "uploader": "Rick Astley",
            "view_count": 1500000000,
            "formats": [
                {"format_id": "139", "height": null},
                {"format_id": "160", "height": 144},
                {"format_id": "18", "height": 360},
                {"format_id": "22", "height": 720},
                {"format_id": "137", "height": 1080}
            ]
        }"#;

        let meta = parse_metadata(doc).unwrap();
        assert_eq!(meta.title, "Never Gonna Give You Up");
        assert_eq!(meta.uploader, "Rick Astley");
        assert_eq!(meta.duration, "3:33");
        assert_eq!(meta.view_count, 1_500_000_000);
        assert_eq!(labels(&meta.variants), tags(&["1080p", "720p", "360p", "144p", "mp3"]));
    }

    #[test]
    fn test_parse_applies_fallbacks() {
        let meta = parse_metadata(br#"{"title": "", "formats": []}"#).unwrap();
        assert_eq!(meta.title, UNKNOWN_TITLE);
        assert_eq!(meta.thumbnail, "");
        assert_eq!(meta.duration, UNKNOWN_DURATION);
        assert_eq!(meta.uploader, UNKNOWN_CHANNEL);
        assert_eq!(meta.view_count, 0);
        assert_eq!(meta.variants, vec![VariantTag::Audio]);

        let meta = parse_metadata(br#"{"view_count": null, "formats": null}"#).unwrap();
        assert_eq!(meta.view_count, 0);
        assert_eq!(meta.variants, vec![VariantTag::Audio]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_metadata(b"not json"), Err(DownloadError::Malformed(_))));
        assert!(matches!(parse_metadata(b""), Err(DownloadError::Malformed(_))));
    }

    #[test]
    fn test_serialized_keys() {
        let meta = parse_metadata(br#"{"title": "T", "uploader": "U", "formats": [{"height": 720}]}"#).unwrap();
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["channel"], "U");
        assert_eq!(value["formats"], serde_json::json!(["720p", "mp3"]));
        assert_eq!(value["view_count"], 0);
        assert!(value.get("uploader").is_none());
    }

    struct TitleOnly(Result<String, DownloadError>);

    #[async_trait]
    impl MediaExtractor for TitleOnly {
        fn name(&self) -> &str {
            "title-only"
        }

        async fn dump_metadata(&self, _: &MediaLocator) -> Result<Vec<u8>, DownloadError> {
            Err(DownloadError::Spawn("unused".into()))
        }

        async fn get_title(&self, _: &MediaLocator) -> Result<String, DownloadError> {
            self.0.clone()
        }

        fn spawn_stream(&self, _: &MediaLocator, _: &FormatSelection) -> Result<Child, DownloadError> {
            Err(DownloadError::Spawn("unused".into()))
        }
    }

    #[tokio::test]
    async fn test_resolve_filename_stem() {
        let locator = validate_locator("https://youtu.be/dQw4w9WgXcQ").unwrap();

        let ok = TitleOnly(Ok("My Video!! (2024)".into()));
        assert_eq!(resolve_filename_stem(&ok, &locator, "video").await, "My_Video_2024");

        let failed = TitleOnly(Err(DownloadError::Timeout("slow".into())));
        assert_eq!(resolve_filename_stem(&failed, &locator, "audio").await, "audio");

        let unicode_only = TitleOnly(Ok("日本語のタイトル".into()));
        assert_eq!(resolve_filename_stem(&unicode_only, &locator, "video").await, "video");
    }
}
