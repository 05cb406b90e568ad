//! Metrics collection using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Stream sessions (started, outcome, bytes forwarded, currently active)
//! - Metadata requests
//! - yt-dlp invocation durations and classified failures
//! - Errors by kind and stage

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge, HistogramVec,
    TextEncoder,
};

// ======================
// STREAM METRICS
// ======================

lazy_static! {
    /// Stream sessions started
    /// Labels: variant (2160p/.../144p/mp3)
    pub static ref STREAMS_STARTED_TOTAL: CounterVec = register_counter_vec!(
        "ytstream_streams_started_total",
        "Total number of stream sessions that spawned yt-dlp",
        &["variant"]
    )
    .unwrap();

    /// Stream sessions by terminal outcome
    /// Labels: outcome (completed/failed/post_commit_failure/client_aborted/shutdown)
    pub static ref STREAM_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "ytstream_stream_outcomes_total",
        "Total number of stream sessions by terminal outcome",
        &["outcome"]
    )
    .unwrap();

    /// Bytes forwarded from yt-dlp stdout to clients
    /// Labels: container (mp4/mp3)
    pub static ref STREAMED_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "ytstream_streamed_bytes_total",
        "Total number of media bytes forwarded to clients",
        &["container"]
    )
    .unwrap();

    /// Sessions with a live yt-dlp process right now
    pub static ref ACTIVE_STREAMS: Gauge = register_gauge!(
        "ytstream_active_streams",
        "Number of stream sessions with a running yt-dlp process"
    )
    .unwrap();
}

// ======================
// EXTRACTOR METRICS
// ======================

lazy_static! {
    /// yt-dlp one-shot execution duration
    /// Labels: operation (metadata/title)
    pub static ref YTDLP_EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "ytstream_ytdlp_execution_duration_seconds",
        "Time spent executing one-shot yt-dlp commands",
        &["operation"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    /// Metadata dump invocations (API and CLI) by result
    /// Labels: result (success/spawn/exit/timeout/malformed/io)
    pub static ref METADATA_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "ytstream_metadata_requests_total",
        "Total number of metadata dump invocations by result",
        &["result"]
    )
    .unwrap();

    /// yt-dlp failures by stderr classification
    /// Labels: reason (invalid_cookies/bot_detection/video_unavailable/network/missing_ffmpeg/unknown)
    pub static ref YTDLP_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "ytstream_ytdlp_failures_total",
        "Total number of failed yt-dlp invocations by classified reason",
        &["reason"]
    )
    .unwrap();

    /// Errors by kind and stage
    /// Labels: kind (invalid_locator/extraction_failed/...), stage (info/download/audio)
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "ytstream_errors_total",
        "Total number of errors reported to clients",
        &["kind", "stage"]
    )
    .unwrap();
}

/// Force registration of every metric so `/metrics` lists them from the start.
pub fn init_metrics() {
    lazy_static::initialize(&STREAMS_STARTED_TOTAL);
    lazy_static::initialize(&STREAM_OUTCOMES_TOTAL);
    lazy_static::initialize(&STREAMED_BYTES_TOTAL);
    lazy_static::initialize(&ACTIVE_STREAMS);
    lazy_static::initialize(&YTDLP_EXECUTION_DURATION_SECONDS);
    lazy_static::initialize(&METADATA_REQUESTS_TOTAL);
    lazy_static::initialize(&YTDLP_FAILURES_TOTAL);
    lazy_static::initialize(&ERRORS_TOTAL);
}

/// Helper function to record an error returned to a client
pub fn record_error(kind: &str, stage: &str) {
    ERRORS_TOTAL.with_label_values(&[kind, stage]).inc();
}

/// Helper function to record a stream terminal outcome
pub fn record_stream_outcome(outcome: &str) {
    STREAM_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Current number of live stream sessions
pub fn active_streams() -> u64 {
    ACTIVE_STREAMS.get().max(0.0) as u64
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((
        encoder.format_type().to_string(),
        String::from_utf8_lossy(&buffer).into_owned(),
    ))
}

/// Increments [`ACTIVE_STREAMS`] on creation and decrements it on drop.
#[derive(Debug)]
pub struct ActiveStreamGuard(());

impl ActiveStreamGuard {
    pub fn new() -> Self {
        ACTIVE_STREAMS.inc();
        Self(())
    }
}

impl Default for ActiveStreamGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        ACTIVE_STREAMS.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // If this doesn't panic, metrics were initialized successfully
    }

    #[test]
    fn test_record_error() {
        record_error("spawn_failed", "download");
        let metric = ERRORS_TOTAL.with_label_values(&["spawn_failed", "download"]).get();
        assert!(metric >= 1.0);
    }

    #[test]
    fn test_record_stream_outcome() {
        record_stream_outcome("completed");
        let metric = STREAM_OUTCOMES_TOTAL.with_label_values(&["completed"]).get();
        assert!(metric >= 1.0);
    }

    #[test]
    fn test_metadata_counter_describes_every_caller() {
        METADATA_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
        let (_, body) = render().unwrap();
        assert!(body.contains(
            "# HELP ytstream_metadata_requests_total Total number of metadata dump invocations by result"
        ));
    }

    #[test]
    fn test_render_contains_metric_names() {
        init_metrics();
        record_error("io", "info");
        let (content_type, body) = render().unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("ytstream_errors_total"));
    }
}
