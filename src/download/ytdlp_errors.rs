//! yt-dlp stderr analysis
//!
//! Classifies a failed invocation from its stderr so logs can carry an
//! operator hint and metrics a stable label. Clients never see the
//! classification; they get the generic per-stage error plus raw stderr.

/// Kinds of yt-dlp failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YtDlpErrorType {
    /// Cookies are invalid or expired
    InvalidCookies,
    /// The site flagged the request as automated
    BotDetection,
    /// Video is private, removed or geo-blocked
    VideoUnavailable,
    /// Timeouts, refused connections, DNS failures
    NetworkError,
    /// A merge or extract-audio step needs ffmpeg
    MissingFfmpeg,
    /// Anything else
    Unknown,
}

impl YtDlpErrorType {
    /// Stable label for metrics and structured log fields
    pub fn label(self) -> &'static str {
        match self {
            YtDlpErrorType::InvalidCookies => "invalid_cookies",
            YtDlpErrorType::BotDetection => "bot_detection",
            YtDlpErrorType::VideoUnavailable => "video_unavailable",
            YtDlpErrorType::NetworkError => "network",
            YtDlpErrorType::MissingFfmpeg => "missing_ffmpeg",
            YtDlpErrorType::Unknown => "unknown",
        }
    }
}

/// Analyzes yt-dlp stderr and determines the error type
pub fn analyze_ytdlp_error(stderr: &str) -> YtDlpErrorType {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("cookies are no longer valid")
        || stderr_lower.contains("cookies have likely been rotated")
        || stderr_lower.contains("sign in to confirm you're not a bot")
        || stderr_lower.contains("please sign in")
        || stderr_lower.contains("use --cookies-from-browser")
        || stderr_lower.contains("use --cookies for the authentication")
    {
        return YtDlpErrorType::InvalidCookies;
    }

    if stderr_lower.contains("bot detection")
        || stderr_lower.contains("http error 403")
        || stderr_lower.contains("http error 429")
        || stderr_lower.contains("signature extraction failed")
    {
        return YtDlpErrorType::BotDetection;
    }

    if stderr_lower.contains("private video")
        || stderr_lower.contains("video unavailable")
        || stderr_lower.contains("this video is not available")
        || stderr_lower.contains("video is private")
        || stderr_lower.contains("video has been removed")
        || stderr_lower.contains("this video does not exist")
        || stderr_lower.contains("video is not available")
        || stderr_lower.contains("is not a valid url")
    {
        return YtDlpErrorType::VideoUnavailable;
    }

    if stderr_lower.contains("ffmpeg not found")
        || stderr_lower.contains("ffprobe and ffmpeg not found")
        || stderr_lower.contains("ffmpeg is not installed")
    {
        return YtDlpErrorType::MissingFfmpeg;
    }

    if stderr_lower.contains("timed out")
        || stderr_lower.contains("timeout")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("network")
        || stderr_lower.contains("socket")
        || stderr_lower.contains("name resolution")
        || stderr_lower.contains("failed to connect")
    {
        return YtDlpErrorType::NetworkError;
    }

    YtDlpErrorType::Unknown
}

/// Returns a one-line operator hint for logs
pub fn get_fix_recommendations(error_type: YtDlpErrorType) -> &'static str {
    match error_type {
        YtDlpErrorType::InvalidCookies => {
            "Refresh the Netscape cookies file referenced by YTDL_COOKIES_FILE and restart"
        }
        YtDlpErrorType::BotDetection => {
            "Requests are being flagged; update yt-dlp, provide fresh cookies or route through YTDL_PROXY"
        }
        YtDlpErrorType::VideoUnavailable => "Video is unavailable; no action needed",
        YtDlpErrorType::MissingFfmpeg => "Install ffmpeg; merging and MP3 extraction depend on it",
        YtDlpErrorType::NetworkError => "Check outbound connectivity and proxy settings",
        YtDlpErrorType::Unknown => "Inspect the stderr excerpt and make sure yt-dlp is up to date",
    }
}

/// Whether the failure points at the deployment rather than the requested video
pub fn is_operator_actionable(error_type: YtDlpErrorType) -> bool {
    !matches!(error_type, YtDlpErrorType::VideoUnavailable)
}

/// Classify `stderr` and log it at a level matching the classification.
pub fn log_classified_failure(context: &str, stderr: &str) -> YtDlpErrorType {
    let error_type = analyze_ytdlp_error(stderr);
    crate::core::metrics::YTDLP_FAILURES_TOTAL
        .with_label_values(&[error_type.label()])
        .inc();
    let excerpt = crate::core::process::stderr_excerpt(stderr, 500);
    if is_operator_actionable(error_type) {
        log::error!("{} failed [{}]: {}", context, error_type.label(), excerpt);
        log::warn!("  hint: {}", get_fix_recommendations(error_type));
    } else {
        log::info!("{} failed [{}]: {}", context, error_type.label(), excerpt);
    }
    error_type
}
