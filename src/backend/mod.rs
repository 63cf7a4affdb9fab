//! Backend transport layer
//!
//! Everything the core needs from the analysis backend, expressed as the
//! `SessionBackend` trait:
//! - POST /sessions/create - create a session with a named participant
//! - POST /sessions/:id/consent - record the caller's consent decision
//! - GET /sessions/:id/status - side-effect-free consent status
//! - POST /sessions/:id/start - start once both parties consented
//! - POST /analysis/upload - multipart artifact handoff
//! - GET /analysis/:id/status - analysis progress for an uploaded artifact
//!
//! `HttpBackend` talks to the real service; `MemoryBackend` is an
//! in-process implementation with the same reconciliation semantics, used
//! by the tests and the demo flow.

pub mod http;
pub mod memory;
pub mod messages;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::RecordingArtifact;
use crate::error::Result;
use crate::session::{AnalysisStatus, ConsentDecision, SessionSnapshot, SessionState, SessionStatus};

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Source of the opaque bearer credential attached to every request
///
/// Issued by the identity layer, never inspected here. Passing a provider
/// in at construction keeps credential lookup out of the call sites.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> String;
}

/// A fixed token, the common case for a logged-in device
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> String {
        self.0.clone()
    }
}

/// Backend acknowledgement of a received artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub session_id: String,
    pub accepted: bool,
}

/// The backend surface consumed by the session core
///
/// Each call is authenticated as one participant; the backend derives the
/// caller's identity from the credential, which is why consent submission
/// does not name a participant. Responses always reflect the backend's
/// reconciled view, which may already include the other participant's
/// concurrent writes.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create a session with the caller as initiator
    async fn create_session(&self, participant: &str) -> Result<SessionSnapshot>;

    /// Record the caller's consent decision and return the reconciled status
    async fn submit_consent(
        &self,
        session_id: &str,
        decision: ConsentDecision,
    ) -> Result<SessionStatus>;

    /// Side-effect-free status fetch
    async fn poll_status(&self, session_id: &str) -> Result<SessionStatus>;

    /// Start the session; only valid once both parties have consented
    async fn start_session(&self, session_id: &str) -> Result<SessionState>;

    /// Hand the recording bytes to the backend for analysis
    async fn upload_artifact(&self, artifact: &RecordingArtifact) -> Result<UploadReceipt>;

    /// Analysis progress for a previously uploaded artifact
    async fn analysis_status(&self, session_id: &str) -> Result<AnalysisStatus>;
}
