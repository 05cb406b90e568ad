//! Process execution utilities with timeout support
//!
//! Provides helpers for running yt-dlp:
//! - a command builder with the environment every invocation needs
//! - a one-shot runner that kills the process when its deadline passes
//! - a bounded stderr accumulator for long-running streaming sessions

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::core::metrics;
use crate::download::error::DownloadError;

/// Build a tokio `Command` with piped stdio and kill-on-drop.
///
/// `kill_on_drop` guarantees that a dropped handle (cancelled request,
/// elapsed timeout, panicking task) never leaves yt-dlp running.
pub fn command<S: AsRef<OsStr>>(program: S) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env("PYTHONIOENCODING", "utf-8")
        .env("PYTHONUNBUFFERED", "1");
    cmd
}

/// Run a one-shot command to completion with a timeout.
///
/// `operation` labels the invocation in logs and metrics (`metadata`, `title`).
/// Non-zero exit is turned into [`DownloadError::Exit`] carrying stderr.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration, operation: &str) -> Result<Output, DownloadError> {
    let started = Instant::now();
    let child = cmd.spawn().map_err(|e| {
        log::error!("Failed to spawn yt-dlp for {}: {}", operation, e);
        DownloadError::Spawn(e.to_string())
    })?;

    // Dropping the `wait_with_output` future on timeout drops the child,
    // which kills it (kill_on_drop).
    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    metrics::YTDLP_EXECUTION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(DownloadError::Io(e.to_string())),
        Err(_) => {
            log::error!("yt-dlp {} timed out after {}s, killed", operation, timeout.as_secs());
            return Err(DownloadError::Timeout(format!(
                "yt-dlp {} timed out after {}s",
                operation,
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        return Err(DownloadError::Exit {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output)
}

/// stderr text that keeps only the last `limit` bytes.
#[derive(Debug, Clone)]
pub struct StderrBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl StderrBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit: limit.max(1),
            truncated: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.truncated = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lossy UTF-8 text; prefixed with a marker when older output was dropped.
    pub fn into_text(self) -> String {
        let text = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated {
            format!("[...]{}", text)
        } else {
            text
        }
    }
}

/// Drain a stderr pipe until EOF into a bounded buffer.
///
/// Runs as its own task so a chatty stderr can never fill its OS pipe and
/// stall yt-dlp while stdout is being forwarded.
pub async fn drain_stderr<R>(mut stderr: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buffer = StderrBuffer::new(limit);
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) => {
                log::debug!("stderr read failed: {}", e);
                break;
            }
        }
    }
    buffer.into_text()
}

/// Shorten stderr for log lines: trimmed tail of at most `max_chars` characters.
pub fn stderr_excerpt(stderr: &str, max_chars: usize) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}
