use std::fmt;

/// Structured error type for yt-dlp invocations.
///
/// Every operation of [`MediaExtractor`](crate::download::extractor::MediaExtractor)
/// returns one of these instead of a bare exit code, so callers can tell a
/// missing binary from a failed extraction from a hung process.
#[derive(Debug, Clone)]
pub enum DownloadError {
    /// Process could not be launched (binary missing, permission denied)
    Spawn(String),
    /// Process exited unsuccessfully; `code` is `None` when killed by a signal
    Exit { code: Option<i32>, stderr: String },
    /// Process did not finish within its deadline and was killed
    Timeout(String),
    /// Process succeeded but its output could not be understood
    Malformed(String),
    /// Reading from or waiting on the process failed
    Io(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Spawn(msg) => write!(f, "{}", msg),
            DownloadError::Exit { code: Some(code), stderr } => write!(f, "exit code {}: {}", code, stderr.trim()),
            DownloadError::Exit { code: None, stderr } => write!(f, "terminated by signal: {}", stderr.trim()),
            DownloadError::Timeout(msg) => write!(f, "{}", msg),
            DownloadError::Malformed(msg) => write!(f, "{}", msg),
            DownloadError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Returns subcategory for metrics
    pub fn subcategory(&self) -> &'static str {
        match self {
            DownloadError::Spawn(_) => "spawn",
            DownloadError::Exit { .. } => "exit",
            DownloadError::Timeout(_) => "timeout",
            DownloadError::Malformed(_) => "malformed",
            DownloadError::Io(_) => "io",
        }
    }

    /// stderr captured from the process, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            DownloadError::Exit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
