//! Quality tokens, variant tags and yt-dlp format selection.
//!
//! Pure functions only: mapping a requested quality to the yt-dlp `-f`
//! expression, the output container and the MIME type sent to the client.

use serde::{Serialize, Serializer};
use std::fmt;

/// Resolution used when the requested quality is missing or unknown
pub const DEFAULT_RESOLUTION: Resolution = Resolution::P720;

/// Fixed selector for audio-only downloads
pub const AUDIO_SELECTOR: &str = "bestaudio/best";

/// Bitrate handed to `--audio-quality` for MP3 extraction
pub const AUDIO_BITRATE: &str = "192K";

/// Closed set of resolutions offered to clients, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    P144,
    P360,
    P720,
    P1080,
    P1440,
    P2160,
}

impl Resolution {
    /// All resolutions, descending by height.
    pub const DESCENDING: [Resolution; 6] = [
        Resolution::P2160,
        Resolution::P1440,
        Resolution::P1080,
        Resolution::P720,
        Resolution::P360,
        Resolution::P144,
    ];

    pub fn height(self) -> u32 {
        match self {
            Resolution::P2160 => 2160,
            Resolution::P1440 => 1440,
            Resolution::P1080 => 1080,
            Resolution::P720 => 720,
            Resolution::P360 => 360,
            Resolution::P144 => 144,
        }
    }

    /// Highest resolution whose threshold `height` meets; `None` below 144.
    pub fn from_height_floor(height: u32) -> Option<Self> {
        Self::DESCENDING.into_iter().find(|r| height >= r.height())
    }

    /// Exact match of a quality token: `"720"` or `"720p"` (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        let digits = token
            .strip_suffix('p')
            .or_else(|| token.strip_suffix('P'))
            .unwrap_or(token);
        let height: u32 = digits.parse().ok()?;
        Self::DESCENDING.into_iter().find(|r| r.height() == height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

/// A downloadable variant as listed in `/api/info` `formats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantTag {
    Video(Resolution),
    Audio,
}

impl VariantTag {
    pub fn label(&self) -> String {
        match self {
            VariantTag::Video(resolution) => resolution.to_string(),
            VariantTag::Audio => "mp3".to_string(),
        }
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for VariantTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// Output container produced by yt-dlp on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mp3,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mp3 => "mp3",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Mp3 => "audio/mpeg",
        }
    }
}

/// One tier of the video fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorTier {
    /// Best video-only stream at or below the height, merged with best audio
    SplitStreams,
    /// Best pre-muxed stream at or below the height
    CombinedAtHeight,
    /// Whatever yt-dlp considers best
    Unconstrained,
}

/// Declared once; every video selector is rendered from this chain.
const VIDEO_FALLBACK_CHAIN: [SelectorTier; 3] = [
    SelectorTier::SplitStreams,
    SelectorTier::CombinedAtHeight,
    SelectorTier::Unconstrained,
];

impl SelectorTier {
    fn render(self, height: u32) -> String {
        match self {
            SelectorTier::SplitStreams => format!("bv*[height<={}]+ba", height),
            SelectorTier::CombinedAtHeight => format!("best[height<={}]", height),
            SelectorTier::Unconstrained => "best".to_string(),
        }
    }
}

/// Everything yt-dlp and the HTTP layer need to know about the requested variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelection {
    pub variant: VariantTag,
    /// `-f` expression
    pub selector: String,
    pub container: Container,
}

impl FormatSelection {
    pub fn video(resolution: Resolution) -> Self {
        let selector = VIDEO_FALLBACK_CHAIN
            .iter()
            .map(|tier| tier.render(resolution.height()))
            .collect::<Vec<_>>()
            .join("/");
        Self {
            variant: VariantTag::Video(resolution),
            selector,
            container: Container::Mp4,
        }
    }

    pub fn audio() -> Self {
        Self {
            variant: VariantTag::Audio,
            selector: AUDIO_SELECTOR.to_string(),
            container: Container::Mp3,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.variant == VariantTag::Audio
    }

    pub fn mime_type(&self) -> &'static str {
        self.container.mime_type()
    }

    /// Generic filename stem used when no title could be obtained.
    pub fn fallback_stem(&self) -> &'static str {
        if self.is_audio() {
            "audio"
        } else {
            "video"
        }
    }

    /// Attachment filename: `<stem>_<height>p.mp4` or `<stem>.mp3`.
    pub fn attachment_name(&self, stem: &str) -> String {
        match self.variant {
            VariantTag::Video(resolution) => format!("{}_{}.{}", stem, resolution, self.container.extension()),
            VariantTag::Audio => format!("{}.{}", stem, self.container.extension()),
        }
    }
}

/// Map a requested quality to a [`FormatSelection`].
///
/// Unknown or missing tokens fall back to [`DEFAULT_RESOLUTION`]. For audio the
/// token is ignored.
pub fn select(quality: Option<&str>, is_audio: bool) -> FormatSelection {
    if is_audio {
        return FormatSelection::audio();
    }
    let resolution = quality.and_then(Resolution::from_token).unwrap_or_else(|| {
        if let Some(token) = quality {
            log::debug!("Unknown quality {:?}, using {}", token, DEFAULT_RESOLUTION);
        }
        DEFAULT_RESOLUTION
    });
    FormatSelection::video(resolution)
}
