//! Error types and handling
//!
//! Protocol-level errors shared across the session, capture, and upload
//! components. Transient transport problems stay `Network` so the retrying
//! call sites can recognize them; everything a caller must branch on gets
//! its own variant.

use thiserror::Error;

use crate::capture::RecordingArtifact;
use crate::session::SessionState;

/// Errors surfaced by the session core
#[derive(Error, Debug)]
pub enum SessionError {
    /// Operation is no longer valid for the session's current state
    #[error("session {session_id} is {state:?}; operation no longer valid")]
    StaleSession {
        session_id: String,
        state: SessionState,
    },

    /// An operation needed a session, but none has been created yet
    #[error("no session is active")]
    NoSession,

    /// Capture was requested before both participants consented
    #[error("both participants must consent before capture can start")]
    ConsentNotComplete,

    /// Status polling gave up after too many consecutive failures
    #[error("status polling gave up after {failures} consecutive failures")]
    PollExhausted { failures: u32 },

    /// The capture device could not be opened at all
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    /// The device failed after recording had begun; a partial artifact may
    /// exist and is handed back for the caller to keep or discard
    #[error("capture failed mid-recording: {reason}")]
    CaptureFailedMidRecording {
        reason: String,
        partial: Option<RecordingArtifact>,
    },

    /// A second recording was requested while one is active
    #[error("a recording is already active for this session")]
    CaptureAlreadyActive,

    /// Stop/arm requested with no recording in the right state
    #[error("no active recording for this session")]
    CaptureNotActive,

    /// Upload reached a terminal failure
    #[error("upload failed: {reason} (retryable: {retryable})")]
    UploadFailed { reason: String, retryable: bool },

    /// Backend rejected the bearer credential (401-class response)
    #[error("backend rejected credentials")]
    Unauthorized,

    /// Transient transport failure, retryable at the issuing call site
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with something the client cannot interpret
    #[error("unexpected backend response: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether a retrying call site (poller, upload pipeline) may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Network(_))
    }
}

/// Result type alias using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;
