//! Streaming pipeline: yt-dlp stdout forwarded to an HTTP response body.
//!
//! [`StreamingPipeline::start`] spawns yt-dlp and waits for the first stdout
//! chunk (or for the process to fail) before returning. A failure up to that
//! point comes back as an [`AppError`], so the handler can still answer with
//! JSON. Once the first chunk exists the response is committed; the rest of
//! the session runs in a pump task that
//!
//! - reads stdout in chunks of at most `chunk_size` bytes,
//! - pushes them through a bounded channel (a slow client stops the reads,
//!   and the full OS pipe then stalls yt-dlp),
//! - SIGKILLs yt-dlp as soon as the response body is dropped,
//! - records the outcome from the exit status once stdout reaches EOF,
//!   still killing yt-dlp if the client leaves before it exits.
//!
//! stderr is drained by its own task and never reaches the client.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::core::config::{self, Settings};
use crate::core::error::AppError;
use crate::core::process::{drain_stderr, stderr_excerpt};
use crate::core::validation::MediaLocator;
use crate::download::extractor::MediaExtractor;
use crate::download::format_selector::FormatSelection;
use crate::download::session::{SessionState, StreamOutcome, StreamSession};
use crate::download::ytdlp_errors;

/// How long to wait for the stderr drain once the process is gone.
/// ffmpeg spawned by yt-dlp may still hold the pipe open.
const STDERR_COLLECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Tuning knobs taken from [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub channel_capacity: usize,
    pub abort_on_late_failure: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size.max(1),
            channel_capacity: settings.channel_capacity.max(1),
            abort_on_late_failure: settings.abort_on_late_failure,
        }
    }
}

/// Owns the extractor and everything needed to stop live sessions on shutdown.
#[derive(Clone)]
pub struct StreamingPipeline {
    extractor: Arc<dyn MediaExtractor>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    options: PipelineOptions,
}

/// Response body of a committed session.
///
/// Yields the first chunk, then whatever the pump task forwards. An `Err`
/// item means yt-dlp failed after the response was committed; the HTTP
/// layer turns it into an aborted transfer.
pub struct MediaStream {
    pub session_id: Uuid,
    first: Option<Bytes>,
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for MediaStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("session_id", &self.session_id)
            .field("first_pending", &self.first.is_some())
            .finish()
    }
}

/// Why a session stopped reading from yt-dlp.
enum PumpEnd {
    /// stdout reached EOF and the process exited
    Exited(Option<i32>),
    ClientGone,
    Shutdown,
    ReadFailed(io::Error),
}

impl StreamingPipeline {
    pub fn new(extractor: Arc<dyn MediaExtractor>, options: PipelineOptions) -> Self {
        Self {
            extractor,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            options,
        }
    }

    pub fn extractor(&self) -> &Arc<dyn MediaExtractor> {
        &self.extractor
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting sessions, kill live subprocesses and wait up to `grace`
    /// for every pump task to finish. Returns `false` if the grace elapsed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();
        log::info!("Waiting for {} stream task(s) to stop", self.tracker.len());
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                log::warn!(
                    "{} stream task(s) still running after {}s grace",
                    self.tracker.len(),
                    grace.as_secs()
                );
                false
            }
        }
    }

    /// Spawn yt-dlp and return once the first stdout chunk is available.
    pub async fn start(&self, locator: MediaLocator, selection: FormatSelection) -> Result<MediaStream, AppError> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::ShuttingDown);
        }

        let mut session = StreamSession::new(locator, selection);
        let id = session.short_id();
        log::info!(
            "[{}] Starting {} {} stream for {} (-f {})",
            id,
            self.extractor.name(),
            session.selection.variant,
            session.locator,
            session.selection.selector
        );

        let mut child = match self.extractor.spawn_stream(&session.locator, &session.selection) {
            Ok(child) => child,
            Err(e) => {
                session.finish(&StreamOutcome::Failed {
                    code: None,
                    stderr: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let (mut stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                kill_child(&mut child).await;
                let msg = "yt-dlp started without piped stdout/stderr".to_string();
                session.finish(&StreamOutcome::Failed {
                    code: None,
                    stderr: msg.clone(),
                });
                return Err(AppError::SpawnFailed(msg));
            }
        };

        let stderr_task = self
            .tracker
            .spawn(drain_stderr(stderr, config::stream::STDERR_LIMIT_BYTES));
        session.transition(SessionState::Streaming);

        let mut first = BytesMut::with_capacity(self.options.chunk_size);
        let read = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = stdout.read_buf(&mut first) => Some(result),
        };

        match read {
            None => {
                kill_child(&mut child).await;
                stderr_task.abort();
                session.finish(&StreamOutcome::Shutdown);
                Err(AppError::ShuttingDown)
            }
            Some(Err(e)) => {
                kill_child(&mut child).await;
                stderr_task.abort();
                session.finish(&StreamOutcome::Failed {
                    code: None,
                    stderr: e.to_string(),
                });
                Err(AppError::Io(e))
            }
            Some(Ok(0)) => {
                let code = match wait_exit(&mut child, None, &self.shutdown).await {
                    PumpEnd::Exited(code) => code,
                    _ => {
                        kill_child(&mut child).await;
                        stderr_task.abort();
                        session.finish(&StreamOutcome::Shutdown);
                        return Err(AppError::ShuttingDown);
                    }
                };
                let stderr = collect_stderr(stderr_task).await;
                let stderr = if code == Some(0) {
                    log::error!("[{}] yt-dlp exited 0 without writing any output", id);
                    format!("yt-dlp produced no output. {}", stderr.trim()).trim().to_string()
                } else {
                    ytdlp_errors::log_classified_failure(&format!("[{}] Stream", id), &stderr);
                    stderr
                };
                session.finish(&StreamOutcome::Failed {
                    code,
                    stderr: stderr.clone(),
                });
                Err(AppError::ExtractionFailed { stderr })
            }
            Some(Ok(n)) => {
                session.record_chunk(n);
                log::info!("[{}] First {} bytes received, response committed", id, n);

                let (tx, rx) = mpsc::channel(self.options.channel_capacity);
                let session_id = session.id;
                self.tracker.spawn(pump(
                    child,
                    stdout,
                    stderr_task,
                    tx,
                    session,
                    self.shutdown.clone(),
                    self.options,
                ));

                Ok(MediaStream {
                    session_id,
                    first: Some(first.freeze()),
                    rx,
                })
            }
        }
    }
}

/// Forward stdout after the first chunk until EOF, disconnect or shutdown.
async fn pump(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr_task: JoinHandle<String>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    mut session: StreamSession,
    shutdown: CancellationToken,
    options: PipelineOptions,
) {
    let end = loop {
        let mut buf = BytesMut::with_capacity(options.chunk_size);
        let read = tokio::select! {
            _ = tx.closed() => break PumpEnd::ClientGone,
            _ = shutdown.cancelled() => break PumpEnd::Shutdown,
            result = stdout.read_buf(&mut buf) => result,
        };

        let n = match read {
            // yt-dlp may keep running after closing stdout, so the client
            // and shutdown still have to be watched while it exits.
            Ok(0) => break wait_exit(&mut child, Some(&tx), &shutdown).await,
            Ok(n) => n,
            Err(e) => break PumpEnd::ReadFailed(e),
        };

        // `send` waits while the channel is full; that wait is the backpressure.
        let sent = tokio::select! {
            result = tx.send(Ok(buf.freeze())) => result.is_ok(),
            _ = shutdown.cancelled() => break PumpEnd::Shutdown,
        };
        if !sent {
            break PumpEnd::ClientGone;
        }
        session.record_chunk(n);
    };

    let outcome = match end {
        PumpEnd::ClientGone => {
            kill_child(&mut child).await;
            stderr_task.abort();
            StreamOutcome::ClientAborted
        }
        PumpEnd::Shutdown => {
            kill_child(&mut child).await;
            stderr_task.abort();
            let _ = tx.try_send(Err(io::Error::other("server shutting down")));
            StreamOutcome::Shutdown
        }
        PumpEnd::ReadFailed(e) => {
            kill_child(&mut child).await;
            stderr_task.abort();
            late_failure(&tx, &options, None, &e.to_string()).await;
            StreamOutcome::PostCommitFailure {
                code: None,
                stderr: e.to_string(),
            }
        }
        PumpEnd::Exited(code) => {
            let stderr = collect_stderr(stderr_task).await;
            if code == Some(0) {
                StreamOutcome::Completed
            } else {
                ytdlp_errors::log_classified_failure(&format!("[{}] Stream", session.short_id()), &stderr);
                late_failure(&tx, &options, code, &stderr).await;
                StreamOutcome::PostCommitFailure { code, stderr }
            }
        }
    };

    session.finish(&outcome);
}

/// Signal a post-commit failure to the body, if configured to.
async fn late_failure(tx: &mpsc::Sender<io::Result<Bytes>>, options: &PipelineOptions, code: Option<i32>, stderr: &str) {
    if !options.abort_on_late_failure {
        return;
    }
    let msg = format!("yt-dlp failed mid-stream ({:?}): {}", code, stderr_excerpt(stderr, 200));
    // Ignored when the client is already gone.
    let _ = tx.send(Err(io::Error::other(msg))).await;
}

/// Wait for the exit status unless the client (when `tx` is given) or
/// shutdown gets there first. The process is left running in that case.
async fn wait_exit(
    child: &mut Child,
    tx: Option<&mpsc::Sender<io::Result<Bytes>>>,
    shutdown: &CancellationToken,
) -> PumpEnd {
    let client_gone = async {
        match tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = child.wait() => match result {
            Ok(status) => PumpEnd::Exited(status.code()),
            Err(e) => {
                log::error!("Failed to wait for yt-dlp: {}", e);
                PumpEnd::Exited(None)
            }
        },
        _ = client_gone => PumpEnd::ClientGone,
        _ = shutdown.cancelled() => PumpEnd::Shutdown,
    }
}

/// stderr collected by the drain task, once the process is gone.
async fn collect_stderr(stderr_task: JoinHandle<String>) -> String {
    match tokio::time::timeout(STDERR_COLLECT_TIMEOUT, stderr_task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            log::debug!("stderr drain task failed: {}", e);
            String::new()
        }
        Err(_) => {
            log::debug!("stderr still open {}s after exit, giving up", STDERR_COLLECT_TIMEOUT.as_secs());
            String::new()
        }
    }
}

/// SIGKILL and reap.
async fn kill_child(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        // Already exited
        log::debug!("start_kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        log::warn!("Failed to reap yt-dlp after kill: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::validation::validate_locator;
    use crate::download::error::DownloadError;
    use crate::download::format_selector::select;
    use async_trait::async_trait;
    use futures_util::StreamExt;

    /// Runs `sh -c <script>` instead of yt-dlp.
    struct ShellExtractor(String);

    #[async_trait]
    impl MediaExtractor for ShellExtractor {
        fn name(&self) -> &str {
            "sh"
        }

        async fn dump_metadata(&self, _: &MediaLocator) -> Result<Vec<u8>, DownloadError> {
            Err(DownloadError::Spawn("not used".into()))
        }

        async fn get_title(&self, _: &MediaLocator) -> Result<String, DownloadError> {
            Ok("title".into())
        }

        fn spawn_stream(&self, _: &MediaLocator, _: &FormatSelection) -> Result<Child, DownloadError> {
            let mut cmd = crate::core::process::command("sh");
            cmd.args(["-c", &self.0]);
            cmd.spawn().map_err(|e| DownloadError::Spawn(e.to_string()))
        }
    }

    fn pipeline(script: &str, abort_on_late_failure: bool) -> StreamingPipeline {
        StreamingPipeline::new(
            Arc::new(ShellExtractor(script.to_string())),
            PipelineOptions {
                chunk_size: 4,
                channel_capacity: 2,
                abort_on_late_failure,
            },
        )
    }

    fn locator() -> MediaLocator {
        validate_locator("https://www.youtube.com/watch?v=abc").unwrap()
    }

    async fn collect(mut stream: MediaStream) -> (Vec<u8>, Option<io::Error>) {
        let mut body = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => body.extend_from_slice(&chunk),
                Err(e) => return (body, Some(e)),
            }
        }
        (body, None)
    }

    #[tokio::test]
    async fn test_successful_stream_forwards_everything() {
        let p = pipeline("printf 'hello world, this is media'", true);
        let stream = p.start(locator(), select(None, false)).await.unwrap();
        let (body, err) = collect(stream).await;
        assert_eq!(body, b"hello world, this is media");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_failure_before_first_byte_is_an_error() {
        let p = pipeline("echo 'ERROR: Video unavailable' >&2; exit 1", true);
        let err = p.start(locator(), select(None, false)).await.unwrap_err();
        match err {
            AppError::ExtractionFailed { stderr } => assert!(stderr.contains("Video unavailable")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_successful_output_is_an_error() {
        let p = pipeline("exit 0", true);
        let err = p.start(locator(), select(None, true)).await.unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_late_failure_aborts_body() {
        let p = pipeline("printf 'partial'; sleep 0.2; echo 'ERROR: fragment 3' >&2; exit 1", true);
        let stream = p.start(locator(), select(None, false)).await.unwrap();
        let (body, err) = collect(stream).await;
        assert_eq!(body, b"partial");
        let err = err.expect("late failure must surface as a stream error");
        assert!(err.to_string().contains("fragment 3"));
    }

    #[tokio::test]
    async fn test_late_failure_truncates_cleanly_when_configured() {
        let p = pipeline("printf 'partial'; sleep 0.2; exit 1", false);
        let stream = p.start(locator(), select(None, false)).await.unwrap();
        let (body, err) = collect(stream).await;
        assert_eq!(body, b"partial");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_sessions() {
        let p = pipeline("printf x", true);
        assert!(p.shutdown(Duration::from_secs(1)).await);
        assert!(p.is_shutting_down());
        let err = p.start(locator(), select(None, false)).await.unwrap_err();
        assert!(matches!(err, AppError::ShuttingDown));
    }

    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn wait_for_exit(pid: u32) -> bool {
        for _ in 0..250 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Script that records its pid, writes `payload`, closes stdout and
    /// keeps running.
    fn lingering_script(pid_file: &std::path::Path, payload: &str) -> String {
        format!(
            "echo $$ > '{}'; printf '{}'; exec 1>&-; exec sleep 30",
            pid_file.display(),
            payload
        )
    }

    fn read_pid(pid_file: &std::path::Path) -> u32 {
        std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap()
    }

    async fn read_exactly(stream: &mut MediaStream, len: usize) -> Vec<u8> {
        let mut body = Vec::new();
        while body.len() < len {
            let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("chunk in time")
                .expect("stream still open")
                .unwrap();
            body.extend_from_slice(&chunk);
        }
        body
    }

    #[tokio::test]
    async fn test_client_leaving_after_eof_kills_lingering_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let p = pipeline(&lingering_script(&pid_file, "all-bytes"), true);

        let mut stream = p.start(locator(), select(None, false)).await.unwrap();
        assert_eq!(read_exactly(&mut stream, 9).await, b"all-bytes");
        let pid = read_pid(&pid_file);
        assert!(process_alive(pid));

        drop(stream);
        assert!(wait_for_exit(pid).await, "yt-dlp {} outlived its client", pid);
    }

    #[tokio::test]
    async fn test_shutdown_stops_process_lingering_after_eof() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let p = pipeline(&lingering_script(&pid_file, "all-bytes"), true);

        let mut stream = p.start(locator(), select(None, false)).await.unwrap();
        assert_eq!(read_exactly(&mut stream, 9).await, b"all-bytes");
        let pid = read_pid(&pid_file);

        let started = std::time::Instant::now();
        assert!(p.shutdown(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_shutdown_stops_silent_process_before_first_byte() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let p = pipeline(&lingering_script(&pid_file, ""), true);

        let starting = tokio::spawn({
            let p = p.clone();
            async move { p.start(locator(), select(None, false)).await }
        });
        let mut pid = None;
        for _ in 0..250 {
            pid = std::fs::read_to_string(&pid_file)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            if pid.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let pid = pid.expect("script started");

        assert!(p.shutdown(Duration::from_secs(5)).await);
        let result = tokio::time::timeout(Duration::from_secs(5), starting)
            .await
            .expect("start returned")
            .unwrap();
        assert!(matches!(result, Err(AppError::ShuttingDown)));
        assert!(wait_for_exit(pid).await);
    }

    #[tokio::test]
    async fn test_shutdown_kills_live_stream() {
        let p = pipeline("printf 'start'; sleep 30; printf 'never'", true);
        let stream = p.start(locator(), select(None, false)).await.unwrap();
        let started = std::time::Instant::now();
        assert!(p.shutdown(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        let (body, err) = collect(stream).await;
        assert!(body.starts_with(b"star"));
        assert!(!body.ends_with(b"never"));
        assert!(err.is_some());
    }
}
