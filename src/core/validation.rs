//! Input validation utilities
//!
//! Provides the two pure checks that run before any yt-dlp process exists:
//! - Locator validation (YouTube URL shape, whitelist-based)
//! - Attachment filename sanitization (ASCII-safe `Content-Disposition` names)

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Maximum length of a sanitized filename stem (in characters)
pub const MAX_FILENAME_LEN: usize = 100;

/// Accepted locator shape: optional scheme, optional `www.`, one of the two
/// YouTube hosts, then a non-empty path.
#[allow(clippy::expect_used)]
static LOCATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+$").expect("locator regex must compile")
});

/// Validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `url` query parameter absent or empty
    #[error("URL parameter is required")]
    MissingLocator,

    /// Input does not look like a YouTube URL
    #[error("Invalid YouTube URL: {0}")]
    InvalidLocator(String),
}

/// A locator that passed [`validate_locator`].
///
/// The only way to obtain one is through validation, so every value handed to
/// yt-dlp went through the whitelist first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaLocator(String);

impl MediaLocator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MediaLocator {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validates that a string plausibly points at a YouTube video.
///
/// Matching is case-insensitive. No network access, no subprocess.
///
/// # Examples
/// ```
/// use ytstream::core::validation::validate_locator;
///
/// assert!(validate_locator("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
/// assert!(validate_locator("youtu.be/dQw4w9WgXcQ").is_ok());
/// assert!(validate_locator("HTTPS://YOUTUBE.COM/shorts/abc").is_ok());
///
/// assert!(validate_locator("https://evil.com/watch?v=dQw4w9WgXcQ").is_err());
/// assert!(validate_locator("https://youtube.com/").is_err());
/// assert!(validate_locator("").is_err());
/// ```
pub fn validate_locator(raw: &str) -> Result<MediaLocator, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::MissingLocator);
    }
    if !LOCATOR_RE.is_match(raw) {
        return Err(ValidationError::InvalidLocator(raw.to_string()));
    }
    Ok(MediaLocator(raw.to_string()))
}

/// Validates an optional query parameter, treating `None` like an empty string.
pub fn validate_optional_locator(raw: Option<&str>) -> Result<MediaLocator, ValidationError> {
    validate_locator(raw.unwrap_or_default())
}

/// Turns an arbitrary title into a safe attachment filename stem.
///
/// Keeps ASCII letters, digits, `_`, `-` and whitespace; strips everything else
/// (no substitution), collapses whitespace runs into a single `_` and truncates
/// to [`MAX_FILENAME_LEN`] characters.
///
/// # Examples
/// ```
/// use ytstream::core::validation::sanitize_title;
///
/// assert_eq!(sanitize_title("My Video!! (2024) — Part #1"), "My_Video_2024_Part_1");
/// assert_eq!(sanitize_title("lo-fi  beats_24/7"), "lo-fi_beats_247");
/// ```
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_FILENAME_LEN));
    let mut in_whitespace = false;

    for c in title.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
                in_whitespace = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            in_whitespace = false;
        }
        // Everything else is dropped without breaking a whitespace run.
    }

    out.chars().take(MAX_FILENAME_LEN).collect()
}
