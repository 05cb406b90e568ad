//! ytstream - HTTP API that streams YouTube downloads through yt-dlp
//!
//! Nothing is written to disk: yt-dlp writes the requested variant to its
//! stdout and the bytes are forwarded to the client as they arrive.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, validation and the web server
//! - `download`: yt-dlp integration, metadata, format selection and the streaming pipeline
//! - `cli`: command line interface

pub mod cli;
pub mod core;
pub mod download;

// Re-export commonly used types for convenience
pub use core::config::Settings;
pub use core::error::{AppError, AppResult};
pub use download::pipeline::StreamingPipeline;
