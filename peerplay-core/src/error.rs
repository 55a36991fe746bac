//! Error types for session control and its external collaborators.

use std::path::PathBuf;

/// Failures turning a locator into torrent metadata.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unsupported torrent locator: {locator}")]
    UnsupportedLocator { locator: String },

    #[error("Invalid magnet link: {reason}")]
    InvalidMagnet { reason: String },

    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Failed to fetch torrent from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read torrent file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Resolution timed out after {seconds}s")]
    TimedOut { seconds: u64 },
}

/// Failures inside the streaming engine adapter.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Could not bind a local port (preferred {preferred}): {reason}")]
    BindFailed { preferred: u16, reason: String },

    #[error("Failed to prepare scratch directory {}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Streaming engine was stopped before it started listening")]
    Stopped,
}

/// Failures talking to the external media player.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Failed to launch player `{program}`")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Player is not running")]
    NotRunning,

    #[error("Player I/O error")]
    Io(#[from] std::io::Error),
}

/// Failures touching the scratch directory root. Never surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to read temp root {}", path.display())]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Client-visible failures of session operations.
///
/// Every variant is reported to the HTTP caller as a bad request. None of
/// them leave a session behind.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Torrent resolution failed: {0}")]
    ResolutionFailed(#[source] ResolveError),

    #[error("Stream bind failed: {reason}")]
    BindFailed { reason: String },

    #[error("Stream was interrupted")]
    StreamInterrupted,

    #[error("Player launch failed: {0}")]
    PlayerLaunchFailed(#[source] PlayerError),

    #[error("Timed out after {seconds}s waiting for {stage}")]
    Timeout { stage: &'static str, seconds: u64 },
}

impl SessionError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SessionError::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns a message suitable for the HTTP response body.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidRequest { reason } => reason.clone(),
            SessionError::ResolutionFailed(e) => e.to_string(),
            SessionError::BindFailed { reason } => format!("Could not open stream: {reason}"),
            SessionError::StreamInterrupted => "Stream was interrupted".to_string(),
            SessionError::PlayerLaunchFailed(e) => format!("Could not start player: {e}"),
            SessionError::Timeout { stage, seconds } => {
                format!("Timed out after {seconds}s waiting for {stage}")
            }
        }
    }

    /// Checks if this error is due to the caller's input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SessionError::InvalidRequest { .. })
    }
}

impl From<EngineError> for SessionError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Stopped => SessionError::StreamInterrupted,
            other => SessionError::BindFailed {
                reason: other.to_string(),
            },
        }
    }
}
