//! Configuration for the streaming service.
//!
//! Every value is read once from the environment (optionally populated from
//! `.env` by `dotenvy` in `main`). Code that needs to be testable takes a
//! [`Settings`] value instead of reading these statics directly.

use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Path to a Netscape cookies file forwarded to yt-dlp as `--cookies`
/// Read from YTDL_COOKIES_FILE environment variable
/// Ignored when the file does not exist
pub static YTDL_COOKIES_FILE: Lazy<Option<String>> =
    Lazy::new(|| env::var("YTDL_COOKIES_FILE").ok().filter(|s| !s.trim().is_empty()));

/// Proxy URL forwarded to yt-dlp as `--proxy`
/// Read from YTDL_PROXY environment variable
/// Example: socks5://127.0.0.1:40000
pub static YTDL_PROXY: Lazy<Option<String>> = Lazy::new(|| {
    env::var("YTDL_PROXY")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "none" && s != "disabled")
});

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Log level (error, warn, info, debug, trace)
/// Read from LOG_LEVEL environment variable
/// Default: info
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

/// Directory with the browser frontend (index.html, script.js, ...)
/// Read from STATIC_DIR environment variable
/// When unset, `/` answers with the JSON service description
pub static STATIC_DIR: Lazy<Option<PathBuf>> =
    Lazy::new(|| env::var("STATIC_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from));

/// HTTP server configuration
pub mod server {
    use super::{env, Duration, Lazy};

    /// Bind address
    pub static HOST: Lazy<String> = Lazy::new(|| env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()));

    /// Bind port
    pub static PORT: Lazy<u16> = Lazy::new(|| super::parse_env("PORT", 3000));

    /// Upper bound on shutdown cleanup (killing subprocesses, draining tasks)
    pub static SHUTDOWN_GRACE_SECS: Lazy<u64> = Lazy::new(|| super::parse_env("SHUTDOWN_GRACE_SECS", 10));

    /// Shutdown grace duration
    pub fn shutdown_grace() -> Duration {
        Duration::from_secs(*SHUTDOWN_GRACE_SECS)
    }
}

/// yt-dlp one-shot invocation timeouts
pub mod extractor {
    use super::{Duration, Lazy};

    /// Timeout for `--dump-json` (in seconds)
    pub static METADATA_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| super::parse_env("METADATA_TIMEOUT_SECS", 120));

    /// Timeout for the `--get-title` filename lookup (in seconds)
    pub static TITLE_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| super::parse_env("TITLE_TIMEOUT_SECS", 15));

    /// Metadata timeout duration
    pub fn metadata_timeout() -> Duration {
        Duration::from_secs(*METADATA_TIMEOUT_SECS)
    }

    /// Title lookup timeout duration
    pub fn title_timeout() -> Duration {
        Duration::from_secs(*TITLE_TIMEOUT_SECS)
    }
}

/// Streaming pipeline tuning
pub mod stream {
    use super::Lazy;

    /// Maximum bytes read from yt-dlp stdout per forwarded chunk
    pub static CHUNK_SIZE: Lazy<usize> = Lazy::new(|| super::parse_env("STREAM_CHUNK_SIZE", 64 * 1024));

    /// Number of chunks buffered between the stdout reader and the response body.
    /// Once full, stdout is no longer read and yt-dlp blocks on its pipe.
    pub static CHANNEL_CAPACITY: Lazy<usize> = Lazy::new(|| super::parse_env("STREAM_CHANNEL_CAPACITY", 8));

    /// Abort the chunked transfer when yt-dlp fails after the first byte was sent
    pub static ABORT_ON_LATE_FAILURE: Lazy<bool> = Lazy::new(|| super::parse_env("ABORT_ON_LATE_FAILURE", true));

    /// Accumulated stderr is capped to this many trailing bytes per session
    pub const STDERR_LIMIT_BYTES: usize = 64 * 1024;
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Runtime settings resolved from the environment.
///
/// Built once in `main` and handed down to the extractor, the pipeline and the
/// web server, so tests can point everything at a fake yt-dlp script.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub ytdl_bin: String,
    pub cookies_file: Option<String>,
    pub proxy: Option<String>,
    pub metadata_timeout: Duration,
    pub title_timeout: Duration,
    pub chunk_size: usize,
    pub channel_capacity: usize,
    pub abort_on_late_failure: bool,
    pub shutdown_grace: Duration,
    pub static_dir: Option<PathBuf>,
}

impl Settings {
    /// Snapshot of the environment-driven configuration.
    pub fn from_env() -> Self {
        Self {
            host: server::HOST.clone(),
            port: *server::PORT,
            ytdl_bin: YTDL_BIN.clone(),
            cookies_file: YTDL_COOKIES_FILE.clone(),
            proxy: YTDL_PROXY.clone(),
            metadata_timeout: extractor::metadata_timeout(),
            title_timeout: extractor::title_timeout(),
            chunk_size: (*stream::CHUNK_SIZE).max(1),
            channel_capacity: (*stream::CHANNEL_CAPACITY).max(1),
            abort_on_late_failure: *stream::ABORT_ON_LATE_FAILURE,
            shutdown_grace: server::shutdown_grace(),
            static_dir: STATIC_DIR.clone(),
        }
    }

    /// Settings for a given yt-dlp binary with every other value at its default.
    pub fn with_binary(ytdl_bin: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ytdl_bin: ytdl_bin.into(),
            cookies_file: None,
            proxy: None,
            metadata_timeout: Duration::from_secs(120),
            title_timeout: Duration::from_secs(15),
            chunk_size: 64 * 1024,
            channel_capacity: 8,
            abort_on_late_failure: true,
            shutdown_grace: Duration::from_secs(10),
            static_dir: None,
        }
    }

    /// Cookies file if configured and present on disk.
    pub fn existing_cookies_file(&self) -> Option<&str> {
        self.cookies_file
            .as_deref()
            .filter(|path| std::path::Path::new(path).is_file())
    }
}
