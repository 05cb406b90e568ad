//! Per-request stream session bookkeeping.
//!
//! A session moves through
//! `Spawned -> Streaming -> Committed -> {Completed | Failed | Aborted}`.
//! `Committed` is entered exactly when the first byte is handed to the
//! response; from then on the HTTP status can no longer change.

use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use crate::core::metrics::{self, ActiveStreamGuard};
use crate::core::validation::MediaLocator;
use crate::download::format_selector::FormatSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Process launched, nothing read yet
    Spawned,
    /// Reading stdout, no byte sent yet
    Streaming,
    /// At least one byte sent; status and headers are final
    Committed,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed | SessionState::Aborted)
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Spawned, Streaming)
                | (Spawned, Failed)
                | (Spawned, Aborted)
                | (Streaming, Committed)
                | (Streaming, Failed)
                | (Streaming, Aborted)
                | (Committed, Completed)
                | (Committed, Failed)
                | (Committed, Aborted)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Spawned => "spawned",
            SessionState::Streaming => "streaming",
            SessionState::Committed => "committed",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Exit code 0 after EOF on stdout
    Completed,
    /// Failure before the first byte; answered with a JSON 500
    Failed { code: Option<i32>, stderr: String },
    /// Non-zero exit after bytes were sent; the client holds a truncated file
    PostCommitFailure { code: Option<i32>, stderr: String },
    /// Client went away; the process was killed
    ClientAborted,
    /// Server shutdown killed the process
    Shutdown,
}

impl StreamOutcome {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Failed { .. } => "failed",
            StreamOutcome::PostCommitFailure { .. } => "post_commit_failure",
            StreamOutcome::ClientAborted => "client_aborted",
            StreamOutcome::Shutdown => "shutdown",
        }
    }

    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> SessionState {
        match self {
            StreamOutcome::Completed => SessionState::Completed,
            StreamOutcome::Failed { .. } | StreamOutcome::PostCommitFailure { .. } => SessionState::Failed,
            StreamOutcome::ClientAborted | StreamOutcome::Shutdown => SessionState::Aborted,
        }
    }
}

/// One download from spawn to terminal state.
///
/// Holds an [`ActiveStreamGuard`], so the active-streams gauge is correct no
/// matter which task drops the session.
#[derive(Debug)]
pub struct StreamSession {
    pub id: Uuid,
    pub locator: MediaLocator,
    pub selection: FormatSelection,
    state: SessionState,
    bytes_sent: u64,
    started: Instant,
    _active: ActiveStreamGuard,
}

impl StreamSession {
    pub fn new(locator: MediaLocator, selection: FormatSelection) -> Self {
        metrics::STREAMS_STARTED_TOTAL
            .with_label_values(&[selection.variant.label().as_str()])
            .inc();
        Self {
            id: Uuid::new_v4(),
            locator,
            selection,
            state: SessionState::Spawned,
            bytes_sent: 0,
            started: Instant::now(),
            _active: ActiveStreamGuard::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn has_emitted_first_byte(&self) -> bool {
        self.bytes_sent > 0
    }

    /// Short id for log lines
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Move to `next`; invalid transitions are logged and ignored.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state.can_transition_to(next) {
            log::debug!("[{}] {} -> {}", self.short_id(), self.state, next);
            self.state = next;
            true
        } else {
            log::warn!("[{}] ignoring transition {} -> {}", self.short_id(), self.state, next);
            false
        }
    }

    /// Account for a chunk handed to the response body.
    pub fn record_chunk(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if self.state == SessionState::Streaming {
            self.transition(SessionState::Committed);
        }
        self.bytes_sent += len as u64;
        metrics::STREAMED_BYTES_TOTAL
            .with_label_values(&[self.selection.container.extension()])
            .inc_by(len as f64);
    }

    /// Enter the terminal state for `outcome`, record it and log it.
    pub fn finish(&mut self, outcome: &StreamOutcome) {
        self.transition(outcome.state());
        metrics::record_stream_outcome(outcome.label());

        let elapsed = self.started.elapsed().as_secs_f64();
        let id = self.short_id();
        match outcome {
            StreamOutcome::Completed => log::info!(
                "[{}] Stream completed: {} bytes in {:.1}s",
                id,
                self.bytes_sent,
                elapsed
            ),
            StreamOutcome::Failed { code, .. } => {
                log::error!("[{}] Stream failed before first byte (exit {:?})", id, code)
            }
            StreamOutcome::PostCommitFailure { code, .. } => log::error!(
                "[{}] yt-dlp exited with {:?} after {} bytes were sent; client file is truncated",
                id,
                code,
                self.bytes_sent
            ),
            StreamOutcome::ClientAborted => log::info!(
                "[{}] Client disconnected after {} bytes, yt-dlp killed",
                id,
                self.bytes_sent
            ),
            StreamOutcome::Shutdown => log::warn!(
                "[{}] Stream cut by shutdown after {} bytes",
                id,
                self.bytes_sent
            ),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // Dropped mid-flight: the request future was cancelled before a
        // response existed, which only happens when the client went away.
        if !self.state.is_terminal() {
            self.finish(&StreamOutcome::ClientAborted);
        }
    }
}
