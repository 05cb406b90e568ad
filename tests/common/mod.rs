//! Common test utilities
//!
//! Integration tests never call the real yt-dlp. [`FakeYtDlp`] writes a shell
//! script into a temp directory that answers the three invocation modes
//! (`--dump-json`, `--get-title`, streaming) with canned behaviour and logs
//! every argument list it was called with.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use ytstream::core::config::Settings;
use ytstream::core::web_server::{build_router, AppState};

pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Metadata document with formats at 144/360/720/1080 plus an audio-only entry.
pub const SAMPLE_METADATA: &str = r#"{"id": "dQw4w9WgXcQ", "title": "Test Video Title", "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hq720.jpg", "duration_string": "3:33", "uploader": "Test Channel", "view_count": 12345, "formats": [{"format_id": "140", "height": null}, {"format_id": "160", "height": 144}, {"format_id": "18", "height": 360}, {"format_id": "22", "height": 720}, {"format_id": "137", "height": 1080}]}"#;

/// Builder for a fake yt-dlp executable.
///
/// Each mode is a shell fragment; `$PID_FILE` and `$CALLS` are available to
/// the fragments.
pub struct FakeYtDlpBuilder {
    metadata: String,
    title: String,
    stream: String,
}

impl Default for FakeYtDlpBuilder {
    fn default() -> Self {
        Self {
            metadata: format!("cat <<'JSON'\n{}\nJSON", SAMPLE_METADATA),
            title: "echo 'Test Video Title'".to_string(),
            stream: "printf 'FAKE-MEDIA-BYTES'".to_string(),
        }
    }
}

impl FakeYtDlpBuilder {
    pub fn metadata(mut self, fragment: &str) -> Self {
        self.metadata = fragment.to_string();
        self
    }

    pub fn title(mut self, fragment: &str) -> Self {
        self.title = fragment.to_string();
        self
    }

    pub fn stream(mut self, fragment: &str) -> Self {
        self.stream = fragment.to_string();
        self
    }

    pub fn install(self) -> FakeYtDlp {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("yt-dlp");
        let calls = dir.path().join("calls.log");
        let pid_file = dir.path().join("stream.pid");

        let script = format!(
            r#"#!/bin/sh
CALLS='{calls}'
PID_FILE='{pid_file}'
echo "$*" >> "$CALLS"
case " $* " in
  *" --dump-json "*)
{metadata}
    ;;
  *" --get-title "*)
{title}
    ;;
  *)
echo $$ > "$PID_FILE"
{stream}
    ;;
esac
"#,
            calls = calls.display(),
            pid_file = pid_file.display(),
            metadata = self.metadata,
            title = self.title,
            stream = self.stream,
        );

        fs::write(&bin, script).expect("write fake yt-dlp");
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).expect("chmod fake yt-dlp");

        FakeYtDlp {
            _dir: dir,
            bin,
            calls,
            pid_file,
        }
    }
}

/// A fake yt-dlp living in its own temp directory.
pub struct FakeYtDlp {
    _dir: TempDir,
    pub bin: PathBuf,
    pub calls: PathBuf,
    pub pid_file: PathBuf,
}

impl FakeYtDlp {
    pub fn builder() -> FakeYtDlpBuilder {
        FakeYtDlpBuilder::default()
    }

    /// Settings pointing at this fake, with small chunks so streams split.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::with_binary(self.bin.to_string_lossy().to_string());
        settings.chunk_size = 4;
        settings.channel_capacity = 2;
        settings.title_timeout = Duration::from_secs(5);
        settings.metadata_timeout = Duration::from_secs(5);
        settings
    }

    pub fn router(&self) -> Router {
        router_for(&self.settings())
    }

    /// Every argument list the fake was called with, one per line.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// PID of the most recent streaming invocation.
    pub fn stream_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid_file).ok()?.trim().parse().ok()
    }
}

pub fn router_for(settings: &Settings) -> Router {
    build_router(AppState::from_settings(settings), None)
}

/// Percent-encode a value for use in a query string.
pub fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("not JSON ({}): {:?}", e, String::from_utf8_lossy(&bytes)))
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Whether a process with this PID still exists.
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Poll `cond` every 20ms until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
