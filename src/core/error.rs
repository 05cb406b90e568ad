use axum::http::StatusCode;
use thiserror::Error;

use crate::core::validation::ValidationError;
use crate::download::error::DownloadError;

/// Centralized error type for everything that can fail before a response is
/// committed.
///
/// Failures after the first streamed byte never become an `AppError`: they are
/// recorded as a [`StreamOutcome`](crate::download::session::StreamOutcome)
/// and only show up in logs and metrics.
///
/// # Example
///
/// ```no_run
/// use ytstream::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("{} -> {}", err, err.status_code());
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad or missing locator; never reaches a subprocess
    #[error(transparent)]
    InvalidLocator(#[from] ValidationError),

    /// yt-dlp exited non-zero (or timed out) before producing any output
    #[error("Extraction failed: {stderr}")]
    ExtractionFailed { stderr: String },

    /// yt-dlp exited 0 but its metadata document could not be parsed
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// yt-dlp could not be launched at all
    #[error("Failed to start yt-dlp: {0}")]
    SpawnFailed(String),

    /// IO errors while talking to the subprocess
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server is draining and does not accept new sessions
    #[error("Server is shutting down")]
    ShuttingDown,
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// HTTP status for the JSON error body.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidLocator(_) => StatusCode::BAD_REQUEST,
            AppError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExtractionFailed { .. }
            | AppError::MalformedMetadata(_)
            | AppError::SpawnFailed(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Diagnostic text for the optional `details` field.
    pub fn details(&self) -> Option<String> {
        match self {
            AppError::InvalidLocator(_) | AppError::ShuttingDown => None,
            AppError::ExtractionFailed { stderr } => Some(stderr.clone()),
            AppError::MalformedMetadata(msg) | AppError::SpawnFailed(msg) => Some(msg.clone()),
            AppError::Io(e) => Some(e.to_string()),
        }
    }

    /// Label used for the `kind` dimension of error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidLocator(_) => "invalid_locator",
            AppError::ExtractionFailed { .. } => "extraction_failed",
            AppError::MalformedMetadata(_) => "malformed_metadata",
            AppError::SpawnFailed(_) => "spawn_failed",
            AppError::Io(_) => "io",
            AppError::ShuttingDown => "shutting_down",
        }
    }
}

impl From<DownloadError> for AppError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Spawn(msg) => AppError::SpawnFailed(msg),
            DownloadError::Exit { stderr, .. } => AppError::ExtractionFailed { stderr },
            // A hung tool is reported like any other failed extraction.
            DownloadError::Timeout(msg) => AppError::ExtractionFailed { stderr: msg },
            DownloadError::Malformed(msg) => AppError::MalformedMetadata(msg),
            DownloadError::Io(msg) => AppError::Io(std::io::Error::other(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::from(ValidationError::MissingLocator).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ExtractionFailed { stderr: "x".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::SpawnFailed("no such file".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::ShuttingDown.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_timeout_maps_to_extraction_failed() {
        let err: AppError = DownloadError::Timeout("yt-dlp timed out after 15s".into()).into();
        assert!(matches!(err, AppError::ExtractionFailed { .. }));
        assert_eq!(err.details().as_deref(), Some("yt-dlp timed out after 15s"));
    }

    #[test]
    fn test_exit_keeps_stderr() {
        let err: AppError = DownloadError::Exit {
            code: Some(1),
            stderr: "ERROR: Video unavailable".into(),
        }
        .into();
        assert_eq!(err.details().as_deref(), Some("ERROR: Video unavailable"));
        assert_eq!(err.kind(), "extraction_failed");
    }

    #[test]
    fn test_validation_has_no_details() {
        let err = AppError::from(ValidationError::InvalidLocator("x".into()));
        assert!(err.details().is_none());
        assert_eq!(err.to_string(), "Invalid YouTube URL: x");
    }
}
