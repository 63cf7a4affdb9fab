use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{SessionBackend, UploadReceipt};
use crate::capture::RecordingArtifact;
use crate::error::{Result, SessionError};
use crate::session::consent::evaluate;
use crate::session::{
    AnalysisStatus, ConsentDecision, ConsentRecord, SessionSnapshot, SessionState, SessionStatus,
};

/// One session as the backend stores it
#[derive(Debug, Clone)]
struct SessionEntry {
    initiator: String,
    participant: String,
    state: SessionState,
    consents: HashMap<String, ConsentRecord>,
    uploaded: bool,
}

impl SessionEntry {
    fn decision_of(&self, user: &str) -> ConsentDecision {
        self.consents
            .get(user)
            .map(|r| r.decision)
            .unwrap_or(ConsentDecision::Pending)
    }

    fn status(&self, session_id: &str) -> SessionStatus {
        let initiator_consent = self.decision_of(&self.initiator) == ConsentDecision::Granted;
        let participant_consent = self.decision_of(&self.participant) == ConsentDecision::Granted;

        SessionStatus {
            session_id: session_id.to_string(),
            state: self.state,
            initiator_consent,
            participant_consent,
            both_consented: initiator_consent && participant_consent,
        }
    }
}

#[derive(Default)]
struct Shared {
    sessions: HashMap<String, SessionEntry>,
    /// Remaining poll_status calls to fail with a network error
    poll_faults: u32,
    /// Remaining upload calls to fail with a network error
    upload_faults: u32,
    /// Total upload attempts observed, including injected failures
    upload_attempts: u32,
}

/// In-process backend with the same reconciliation semantics as the real
/// service
///
/// All mutation happens under one lock, so a submission is applied and the
/// pair re-evaluated atomically: a `both_consented` answer can never be
/// derived from a half-written consent pair. Cloning shares the store;
/// `as_participant` yields a handle authenticated as the other party, the
/// way two devices hold two credentials against one backend.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
    caller: String,
}

impl MemoryBackend {
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            caller: caller.into(),
        }
    }

    /// A handle onto the same store, authenticated as `caller`
    pub fn as_participant(&self, caller: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            caller: caller.into(),
        }
    }

    /// Fail the next `n` status polls with a transient network error
    pub async fn fail_next_polls(&self, n: u32) {
        self.shared.lock().await.poll_faults = n;
    }

    /// Fail the next `n` uploads with a transient network error
    pub async fn fail_next_uploads(&self, n: u32) {
        self.shared.lock().await.upload_faults = n;
    }

    /// Total upload attempts seen, including failed ones
    pub async fn upload_attempts(&self) -> u32 {
        self.shared.lock().await.upload_attempts
    }

    /// Time the session out, as the real backend does on a consent deadline
    pub async fn expire_session(&self, session_id: &str) -> Result<()> {
        let mut shared = self.shared.lock().await;
        let entry = shared
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Backend(format!("unknown session {}", session_id)))?;

        // Expiry only interrupts the consent phase
        match entry.state {
            SessionState::AwaitingConsent | SessionState::BothConsented => {
                entry.state = SessionState::Expired;
                Ok(())
            }
            state => Err(SessionError::StaleSession {
                session_id: session_id.to_string(),
                state,
            }),
        }
    }

    fn require_party(entry: &SessionEntry, caller: &str, session_id: &str) -> Result<()> {
        if entry.initiator != caller && entry.participant != caller {
            return Err(SessionError::Backend(format!(
                "{} is not a party to session {}",
                caller, session_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn create_session(&self, participant: &str) -> Result<SessionSnapshot> {
        if participant == self.caller {
            return Err(SessionError::Backend(
                "a session needs two distinct participants".to_string(),
            ));
        }

        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        let entry = SessionEntry {
            initiator: self.caller.clone(),
            participant: participant.to_string(),
            state: SessionState::Created,
            consents: HashMap::new(),
            uploaded: false,
        };

        let snapshot = SessionSnapshot {
            id: session_id.clone(),
            initiator: entry.initiator.clone(),
            participant: entry.participant.clone(),
            state: entry.state,
        };

        self.shared.lock().await.sessions.insert(session_id.clone(), entry);
        info!("Session created: {} (initiator={})", session_id, self.caller);

        Ok(snapshot)
    }

    async fn submit_consent(
        &self,
        session_id: &str,
        decision: ConsentDecision,
    ) -> Result<SessionStatus> {
        let mut shared = self.shared.lock().await;
        let entry = shared
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Backend(format!("unknown session {}", session_id)))?;

        Self::require_party(entry, &self.caller, session_id)?;

        if !entry.state.accepts_consent() {
            return Err(SessionError::StaleSession {
                session_id: session_id.to_string(),
                state: entry.state,
            });
        }

        // Pending submissions carry no decision; the current view suffices
        if decision != ConsentDecision::Pending {
            entry.consents.insert(
                self.caller.clone(),
                ConsentRecord {
                    session_id: session_id.to_string(),
                    participant: self.caller.clone(),
                    decision,
                    timestamp: Utc::now(),
                },
            );

            let reconciled = evaluate(
                entry.decision_of(&entry.initiator),
                entry.decision_of(&entry.participant),
            );
            entry.state = reconciled;

            debug!(
                "Consent {:?} from {} on {} -> {:?}",
                decision, self.caller, session_id, entry.state
            );
        }

        Ok(entry.status(session_id))
    }

    async fn poll_status(&self, session_id: &str) -> Result<SessionStatus> {
        let mut shared = self.shared.lock().await;
        if shared.poll_faults > 0 {
            shared.poll_faults -= 1;
            return Err(SessionError::Network("injected poll failure".to_string()));
        }

        let entry = shared
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::Backend(format!("unknown session {}", session_id)))?;

        Ok(entry.status(session_id))
    }

    async fn start_session(&self, session_id: &str) -> Result<SessionState> {
        let mut shared = self.shared.lock().await;
        let entry = shared
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Backend(format!("unknown session {}", session_id)))?;

        Self::require_party(entry, &self.caller, session_id)?;

        match entry.state {
            SessionState::BothConsented | SessionState::Started => {
                entry.state = SessionState::Started;
                Ok(SessionState::Started)
            }
            SessionState::Created | SessionState::AwaitingConsent => {
                Err(SessionError::ConsentNotComplete)
            }
            state => Err(SessionError::StaleSession {
                session_id: session_id.to_string(),
                state,
            }),
        }
    }

    async fn upload_artifact(&self, artifact: &RecordingArtifact) -> Result<UploadReceipt> {
        // Read before taking the lock; holding it across file I/O would
        // serialize unrelated sessions
        let bytes = tokio::fs::read(&artifact.local_path).await?;

        let mut shared = self.shared.lock().await;
        shared.upload_attempts += 1;

        if shared.upload_faults > 0 {
            shared.upload_faults -= 1;
            return Err(SessionError::Network(
                "503 service unavailable".to_string(),
            ));
        }

        let entry = shared
            .sessions
            .get_mut(&artifact.session_id)
            .ok_or_else(|| {
                SessionError::Backend(format!("unknown session {}", artifact.session_id))
            })?;

        entry.uploaded = true;
        info!(
            "Artifact received for session {} ({} bytes)",
            artifact.session_id,
            bytes.len()
        );

        Ok(UploadReceipt {
            session_id: artifact.session_id.clone(),
            accepted: true,
        })
    }

    async fn analysis_status(&self, session_id: &str) -> Result<AnalysisStatus> {
        let shared = self.shared.lock().await;
        let entry = shared
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::Backend(format!("unknown session {}", session_id)))?;

        // The in-process backend "analyzes" instantly once bytes arrive
        Ok(AnalysisStatus {
            session_id: session_id.to_string(),
            status: if entry.uploaded {
                "completed".to_string()
            } else {
                "processing".to_string()
            },
            results_available: entry.uploaded,
        })
    }
}
