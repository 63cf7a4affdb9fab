use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// Request body for POST /sessions/create
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub participant_username: String,
}

/// Response body for POST /sessions/create
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub state: SessionState,
}

/// Request body for POST /sessions/{id}/consent
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub consent_given: bool,
}

/// Response body for POST /sessions/{id}/start
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStateResponse {
    pub state: SessionState,
}

/// Response body for POST /analysis/upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadAcceptedResponse {
    pub accepted: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response body for GET /analysis/{id}/status
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisStatusResponse {
    pub status: String,
    pub results_available: bool,
}

/// Error body the backend attaches to non-2xx responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Present on conflict responses so the client can see which state
    /// made the operation invalid
    #[serde(default)]
    pub state: Option<SessionState>,
}
