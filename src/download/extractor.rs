//! Extraction tool abstraction.
//!
//! [`MediaExtractor`] is the seam between the HTTP layer and yt-dlp. The
//! production implementation is [`YtDlp`]; tests swap in a fake binary by
//! building it from [`Settings::with_binary`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::core::config::Settings;
use crate::core::process;
use crate::core::validation::MediaLocator;
use crate::download::error::DownloadError;
use crate::download::format_selector::{FormatSelection, AUDIO_BITRATE};

/// Operations the service needs from an extraction tool.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Raw metadata document for the locator (yt-dlp `--dump-json`).
    async fn dump_metadata(&self, locator: &MediaLocator) -> Result<Vec<u8>, DownloadError>;

    /// Display title for the locator, trimmed.
    async fn get_title(&self, locator: &MediaLocator) -> Result<String, DownloadError>;

    /// Launch the tool writing the selected variant to stdout.
    ///
    /// The returned child has stdout and stderr piped and is killed when dropped.
    fn spawn_stream(&self, locator: &MediaLocator, selection: &FormatSelection) -> Result<Child, DownloadError>;
}

/// yt-dlp invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlp {
    bin: String,
    cookies_file: Option<String>,
    proxy: Option<String>,
    metadata_timeout: Duration,
    title_timeout: Duration,
}

impl YtDlp {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bin: settings.ytdl_bin.clone(),
            cookies_file: settings.existing_cookies_file().map(str::to_string),
            proxy: settings.proxy.clone(),
            metadata_timeout: settings.metadata_timeout,
            title_timeout: settings.title_timeout,
        }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    fn command(&self) -> Command {
        let mut cmd = process::command(&self.bin);
        cmd.args(self.connection_args());
        cmd
    }

    /// `--cookies` / `--proxy` shared by every invocation
    fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }
}

/// Arguments for the metadata dump.
pub fn metadata_args(url: &str) -> Vec<String> {
    ["--dump-json", "--no-warnings", "--no-playlist", url]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Arguments for the filename title lookup.
pub fn title_args(url: &str) -> Vec<String> {
    ["--get-title", "--no-warnings", "--no-playlist", url]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Arguments that make yt-dlp write the selected variant to stdout.
pub fn stream_args(selection: &FormatSelection, url: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-f".into(),
        selection.selector.clone(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--quiet".into(),
        "--no-check-certificate".into(),
        "--prefer-ffmpeg".into(),
    ];

    if selection.is_audio() {
        args.extend([
            "-x".into(),
            "--audio-format".into(),
            selection.container.extension().into(),
            "--audio-quality".into(),
            AUDIO_BITRATE.into(),
        ]);
    } else {
        args.extend([
            "--merge-output-format".into(),
            selection.container.extension().into(),
        ]);
    }

    args.extend(["-o".into(), "-".into(), url.into()]);
    args
}

#[async_trait]
impl MediaExtractor for YtDlp {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn dump_metadata(&self, locator: &MediaLocator) -> Result<Vec<u8>, DownloadError> {
        let mut cmd = self.command();
        cmd.args(metadata_args(locator.as_str()));
        log::debug!("{} --dump-json {}", self.bin, locator);
        let output = process::run_with_timeout(&mut cmd, self.metadata_timeout, "metadata").await?;
        Ok(output.stdout)
    }

    async fn get_title(&self, locator: &MediaLocator) -> Result<String, DownloadError> {
        let mut cmd = self.command();
        cmd.args(title_args(locator.as_str()));
        let output = process::run_with_timeout(&mut cmd, self.title_timeout, "title").await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn spawn_stream(&self, locator: &MediaLocator, selection: &FormatSelection) -> Result<Child, DownloadError> {
        let mut cmd = self.command();
        cmd.args(stream_args(selection, locator.as_str()));
        log::debug!("Spawning {} -f {} for {}", self.bin, selection.selector, locator);
        cmd.spawn().map_err(|e| {
            log::error!("Failed to spawn {}: {}", self.bin, e);
            DownloadError::Spawn(e.to_string())
        })
    }
}
