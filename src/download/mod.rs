//! yt-dlp integration: metadata, format selection and streaming

pub mod error;
pub mod extractor;
pub mod format_selector;
pub mod metadata;
pub mod pipeline;
pub mod session;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use error::DownloadError;
pub use extractor::{MediaExtractor, YtDlp};
pub use pipeline::{MediaStream, PipelineOptions, StreamingPipeline};
