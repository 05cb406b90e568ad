//! Public HTTP API.
//!
//! Routes:
//! - `GET /api/info?url=`            video metadata (JSON)
//! - `GET /api/download?url=&quality=` MP4 stream
//! - `GET /api/audio?url=`           MP3 stream
//! - `GET /health`                   liveness
//! - `GET /metrics`                  Prometheus text format
//! - `GET /api` (and `/` without a static frontend) service description

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::core::config::Settings;
use crate::core::error::AppError;
use crate::core::metrics;
use crate::core::process::stderr_excerpt;
use crate::core::validation::{validate_optional_locator, ValidationError};
use crate::download::extractor::{MediaExtractor, YtDlp};
use crate::download::format_selector::select;
use crate::download::metadata::{self, VideoMetadata};
use crate::download::pipeline::{PipelineOptions, StreamingPipeline};

/// Header carrying the stream session id, handy for correlating logs
pub const SESSION_HEADER: &str = "x-stream-session";

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pipeline: StreamingPipeline,
    start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: StreamingPipeline) -> Self {
        Self {
            pipeline,
            start_time: Instant::now(),
        }
    }

    /// State backed by real yt-dlp as described by `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let extractor: Arc<dyn MediaExtractor> = Arc::new(YtDlp::from_settings(settings));
        Self::new(StreamingPipeline::new(extractor, PipelineOptions::from_settings(settings)))
    }

    pub fn pipeline(&self) -> &StreamingPipeline {
        &self.pipeline
    }
}

/// Which endpoint an error came from; picks the client-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Info,
    Download,
    Audio,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Info => "info",
            Stage::Download => "download",
            Stage::Audio => "audio",
        }
    }

    fn failure_message(self, err: &AppError) -> &'static str {
        match (self, err) {
            (_, AppError::InvalidLocator(ValidationError::MissingLocator)) => "URL parameter is required",
            (_, AppError::InvalidLocator(ValidationError::InvalidLocator(_))) => "Invalid YouTube URL",
            (_, AppError::ShuttingDown) => "Server is shutting down",
            (Stage::Info, AppError::MalformedMetadata(_)) => "Failed to parse video information",
            (Stage::Info, AppError::Io(_)) => "Internal server error",
            (Stage::Info, _) => "Failed to fetch video information",
            (Stage::Download, AppError::SpawnFailed(_)) => "Failed to start download",
            (Stage::Download, _) => "Download failed",
            (Stage::Audio, AppError::SpawnFailed(_)) => "Failed to start audio download",
            (Stage::Audio, _) => "Audio download failed",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// JSON error response, only ever produced before a stream is committed.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    /// Log, count and convert an [`AppError`] raised while serving `stage`.
    pub fn from_app(stage: Stage, url: Option<&str>, err: AppError) -> Self {
        let message = stage.failure_message(&err).to_string();
        let url = url.unwrap_or("-");
        match &err {
            AppError::InvalidLocator(_) => log::warn!("[{}] rejected {:?}: {}", stage.label(), url, err),
            _ => log::error!(
                "[{}] {} failed ({}): {}",
                stage.label(),
                url,
                err.kind(),
                stderr_excerpt(&err.to_string(), 500)
            ),
        }
        metrics::record_error(err.kind(), stage.label());

        Self {
            status: err.status_code(),
            message,
            details: err.details(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaQuery {
    pub url: Option<String>,
    pub quality: Option<String>,
}

/// Build the router. Static files from `static_dir` are served for any path
/// no API route claims.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/api", get(api_docs_handler))
        .route("/api/info", get(info_handler))
        .route("/api/download", get(download_handler))
        .route("/api/audio", get(audio_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.route("/", get(api_docs_handler)),
    };

    router.layer(cors_layer()).with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, HeaderName::from_static(SESSION_HEADER)])
}

/// Bind from settings, serve until SIGINT/SIGTERM, then drain streams.
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let state = AppState::from_settings(&settings);

    log::info!("Starting web server on http://{}", addr);
    log::info!("  /api/info      - Video information (JSON)");
    log::info!("  /api/download  - Video stream (MP4)");
    log::info!("  /api/audio     - Audio stream (MP3)");
    log::info!("  /health        - Health check");
    log::info!("  /metrics       - Prometheus metrics");
    match &settings.static_dir {
        Some(dir) => log::info!("  /*             - Static files from {}", dir.display()),
        None => log::info!("  /              - Service description"),
    }

    serve(
        listener,
        state,
        settings.static_dir.as_deref(),
        settings.shutdown_grace,
        shutdown_signal(),
    )
    .await
    .context("running web server")
}

/// Serve `state` on `listener` until `signal` resolves.
///
/// On signal the pipeline stops accepting sessions and kills every live
/// subprocess (bounded by `grace`) so open download bodies end and the
/// server's own graceful shutdown can finish.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    static_dir: Option<&Path>,
    grace: Duration,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pipeline = state.pipeline.clone();
    let app = build_router(state, static_dir);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            log::info!("Shutdown requested, stopping active streams");
            if pipeline.shutdown(grace).await {
                log::info!("All streams stopped");
            }
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// GET /api/info
async fn info_handler(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Json<VideoMetadata>, ApiError> {
    let url = query.url.as_deref();
    let locator = validate_optional_locator(url).map_err(|e| ApiError::from_app(Stage::Info, url, e.into()))?;

    let meta = metadata::fetch_metadata(state.pipeline.extractor().as_ref(), &locator)
        .await
        .map_err(|e| ApiError::from_app(Stage::Info, url, e.into()))?;

    Ok(Json(meta))
}

/// GET /api/download
async fn download_handler(State(state): State<AppState>, Query(query): Query<MediaQuery>) -> Response {
    stream_response(&state, &query, Stage::Download).await.into_response()
}

/// GET /api/audio
async fn audio_handler(State(state): State<AppState>, Query(query): Query<MediaQuery>) -> Response {
    stream_response(&state, &query, Stage::Audio).await.into_response()
}

async fn stream_response(state: &AppState, query: &MediaQuery, stage: Stage) -> Result<Response, ApiError> {
    let url = query.url.as_deref();
    let fail = |e: AppError| ApiError::from_app(stage, url, e);

    let locator = validate_optional_locator(url).map_err(|e| fail(e.into()))?;
    let selection = select(query.quality.as_deref(), stage == Stage::Audio);

    if state.pipeline.is_shutting_down() {
        return Err(fail(AppError::ShuttingDown));
    }

    let stem =
        metadata::resolve_filename_stem(state.pipeline.extractor().as_ref(), &locator, selection.fallback_stem()).await;
    let filename = selection.attachment_name(&stem);
    log::info!("[{}] {} as {}", stage.label(), locator, filename);

    // Decide every header before the first byte exists.
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(selection.mime_type()));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(CONTENT_DISPOSITION, content_disposition(&filename));

    let stream = state.pipeline.start(locator, selection).await.map_err(fail)?;

    if let Ok(value) = HeaderValue::from_str(&stream.session_id.to_string()) {
        headers.insert(HeaderName::from_static(SESSION_HEADER), value);
    }

    Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
}

/// `attachment; filename="..."`
fn content_disposition(filename: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)).unwrap_or_else(|_| {
        // Sanitized stems are plain ASCII; only reachable if that changes.
        log::warn!("Filename {:?} is not a valid header value", filename);
        HeaderValue::from_static("attachment")
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    let status = json!({
        "status": "healthy",
        "message": "YouTube Downloader API is running",
        "uptime_seconds": uptime.as_secs(),
        "uptime_human": format_duration(uptime),
        "version": env!("CARGO_PKG_VERSION"),
        "active_streams": metrics::active_streams(),
        "shutting_down": state.pipeline.is_shutting_down(),
    });
    (StatusCode::OK, Json(status))
}

/// GET /metrics
async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => (StatusCode::OK, [(CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

/// GET /api and GET /
async fn api_docs_handler() -> impl IntoResponse {
    Json(json!({
        "name": "YouTube Downloader API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /api/info?url=URL": "Get video information",
            "GET /api/download?url=URL&quality=720": "Download video (2160/1440/1080/720/360/144)",
            "GET /api/audio?url=URL": "Download MP3 audio",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics",
        },
        "features": [
            "Streams straight from yt-dlp, nothing is written to disk",
            "JSON errors until the first byte is sent",
            "Supports 4K, 2K, Full HD, HD, SD",
            "MP3 audio extraction",
            "CORS enabled",
        ],
    }))
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
