use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::messages::{
    AnalysisStatusResponse, ConsentRequest, CreateSessionRequest, ErrorBody,
    SessionCreatedResponse, SessionStateResponse, UploadAcceptedResponse,
};
use super::{CredentialProvider, SessionBackend, UploadReceipt};
use crate::capture::RecordingArtifact;
use crate::config::BackendConfig;
use crate::error::{Result, SessionError};
use crate::session::{AnalysisStatus, ConsentDecision, SessionSnapshot, SessionState, SessionStatus};

/// REST client for the analysis backend
///
/// Holds no session logic: it shapes requests, attaches the bearer
/// credential, and maps responses into the core's types. The caller's
/// username is supplied by the identity layer together with the
/// credential; the backend itself derives identity from the token.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    caller: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(
        config: &BackendConfig,
        caller: String,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SessionError::Network(e.to_string()))?;

        info!("Backend client ready: {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            caller,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-2xx response into the error taxonomy
    async fn reject(session_id: &str, response: reqwest::Response) -> SessionError {
        let status = response.status();
        let body: Option<ErrorBody> = response.json().await.ok();
        let detail = body
            .as_ref()
            .map(|b| b.error.clone())
            .unwrap_or_else(|| format!("HTTP {}", status));

        match status {
            StatusCode::UNAUTHORIZED => SessionError::Unauthorized,
            StatusCode::FORBIDDEN => SessionError::ConsentNotComplete,
            StatusCode::CONFLICT => match body.and_then(|b| b.state) {
                Some(state) => SessionError::StaleSession {
                    session_id: session_id.to_string(),
                    state,
                },
                None => SessionError::Backend(detail),
            },
            StatusCode::TOO_MANY_REQUESTS => SessionError::Network(detail),
            s if s.is_server_error() => SessionError::Network(detail),
            _ => SessionError::Backend(detail),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| SessionError::Backend(format!("undecodable response: {}", e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .bearer_auth(self.credentials.bearer_token())
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))
    }
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn create_session(&self, participant: &str) -> Result<SessionSnapshot> {
        let request = self.client.post(self.url("/sessions/create")).json(
            &CreateSessionRequest {
                participant_username: participant.to_string(),
            },
        );

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::reject("", response).await);
        }

        let created: SessionCreatedResponse = Self::decode(response).await?;
        info!("Session created: {}", created.session_id);

        Ok(SessionSnapshot {
            id: created.session_id,
            initiator: self.caller.clone(),
            participant: participant.to_string(),
            state: created.state,
        })
    }

    async fn submit_consent(
        &self,
        session_id: &str,
        decision: ConsentDecision,
    ) -> Result<SessionStatus> {
        let consent_given = match decision {
            ConsentDecision::Granted => true,
            ConsentDecision::Declined => false,
            // Pending is the absence of a record; there is nothing to send
            ConsentDecision::Pending => {
                return self.poll_status(session_id).await;
            }
        };

        let request = self
            .client
            .post(self.url(&format!("/sessions/{}/consent", session_id)))
            .json(&ConsentRequest { consent_given });

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::reject(session_id, response).await);
        }

        debug!("Consent recorded for session {}", session_id);

        // The consent endpoint acknowledges the write; the reconciled view
        // (including the other participant's concurrent decision) comes
        // from the status endpoint.
        self.poll_status(session_id).await
    }

    async fn poll_status(&self, session_id: &str) -> Result<SessionStatus> {
        let request = self
            .client
            .get(self.url(&format!("/sessions/{}/status", session_id)));

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::reject(session_id, response).await);
        }

        Self::decode(response).await
    }

    async fn start_session(&self, session_id: &str) -> Result<SessionState> {
        let request = self
            .client
            .post(self.url(&format!("/sessions/{}/start", session_id)));

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::reject(session_id, response).await);
        }

        let body: SessionStateResponse = Self::decode(response).await?;
        info!("Session started: {}", session_id);
        Ok(body.state)
    }

    async fn upload_artifact(&self, artifact: &RecordingArtifact) -> Result<UploadReceipt> {
        let bytes = tokio::fs::read(&artifact.local_path).await?;
        let file_name = artifact
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.bin", artifact.session_id));

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&artifact.content_type)
            .map_err(|e| SessionError::Backend(format!("bad content type: {}", e)))?;

        let form = multipart::Form::new()
            .text("session_id", artifact.session_id.clone())
            .part("video", part);

        let request = self.client.post(self.url("/analysis/upload")).multipart(form);

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::reject(&artifact.session_id, response).await);
        }

        let body: UploadAcceptedResponse = Self::decode(response).await?;
        info!(
            "Artifact uploaded for session {} ({} bytes, accepted={})",
            artifact.session_id, artifact.size_bytes, body.accepted
        );

        Ok(UploadReceipt {
            session_id: artifact.session_id.clone(),
            accepted: body.accepted,
        })
    }

    async fn analysis_status(&self, session_id: &str) -> Result<AnalysisStatus> {
        let request = self
            .client
            .get(self.url(&format!("/analysis/{}/status", session_id)));

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::reject(session_id, response).await);
        }

        let body: AnalysisStatusResponse = Self::decode(response).await?;
        Ok(AnalysisStatus {
            session_id: session_id.to_string(),
            status: body.status,
            results_available: body.results_available,
        })
    }
}
