use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::model::{ConsentDecision, SessionSnapshot, SessionState, SessionStatus};
use crate::backend::SessionBackend;
use crate::error::{Result, SessionError};

/// Reconcile a consent pair into a session state
///
/// Pure and commutative: the result depends only on the two decisions,
/// never on their arrival order. `Declined` is absorbing — one refusal
/// cancels the session regardless of what the other party does. A pair
/// with no decisions at all is still `Created`.
pub fn evaluate(initiator: ConsentDecision, participant: ConsentDecision) -> SessionState {
    use ConsentDecision::*;

    match (initiator, participant) {
        (Declined, _) | (_, Declined) => SessionState::Cancelled,
        (Granted, Granted) => SessionState::BothConsented,
        (Pending, Pending) => SessionState::Created,
        _ => SessionState::AwaitingConsent,
    }
}

/// Client-side owner of the per-session consent state machine
///
/// Serializes this device's submissions per session and tracks the last
/// reconciled state the backend reported. The backend's answer is always
/// adopted over the local view: it may already include the other
/// participant's concurrent decision, and the authoritative reconciliation
/// lives there.
pub struct ConsentCoordinator {
    backend: Arc<dyn SessionBackend>,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl ConsentCoordinator {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Track a session created on this device
    pub async fn register(&self, snapshot: &SessionSnapshot) {
        let cell = self.session_cell(&snapshot.id).await;
        *cell.lock().await = snapshot.state;
    }

    /// Adopt a state observed elsewhere (status polls)
    pub async fn observe(&self, status: &SessionStatus) {
        let cell = self.session_cell(&status.session_id).await;
        let mut known = cell.lock().await;
        if *known != status.state {
            debug!(
                "Session {} observed {:?} -> {:?}",
                status.session_id, *known, status.state
            );
            *known = status.state;
        }
    }

    /// Last reconciled state this device has seen for the session
    pub async fn known_state(&self, session_id: &str) -> Option<SessionState> {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(cell) => Some(*cell.lock().await),
            None => None,
        }
    }

    /// Submit this participant's decision and return the reconciled status
    ///
    /// Idempotent while the session still accepts consent: a second call
    /// replaces this participant's earlier decision. Once the session has
    /// moved past the consent window the call fails with `StaleSession`
    /// without touching the backend.
    ///
    /// Submissions for one session are serialized behind its lock, so a
    /// submit can never interleave with another submit's evaluate step on
    /// this device.
    pub async fn submit_consent(
        &self,
        session_id: &str,
        decision: ConsentDecision,
    ) -> Result<SessionStatus> {
        let cell = self.session_cell(session_id).await;
        let mut known = cell.lock().await;

        if !known.accepts_consent() {
            return Err(SessionError::StaleSession {
                session_id: session_id.to_string(),
                state: *known,
            });
        }

        let result = self.backend.submit_consent(session_id, decision).await;

        match result {
            Ok(status) => {
                // Adopt the backend's reconciled view, which may already
                // reflect the other participant's write
                *known = status.state;
                info!(
                    "Consent {:?} applied to {}: state {:?}, both_consented={}",
                    decision, session_id, status.state, status.both_consented
                );
                Ok(status)
            }
            Err(SessionError::StaleSession { session_id, state }) => {
                // The backend saw a concurrent transition first; our
                // cached view was behind
                *known = state;
                Err(SessionError::StaleSession { session_id, state })
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the session is ready for the initiator to start it
    pub async fn is_ready(&self, session_id: &str) -> bool {
        matches!(
            self.known_state(session_id).await,
            Some(SessionState::BothConsented) | Some(SessionState::Started)
        )
    }

    async fn session_cell(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::Created)))
            .clone()
    }
}
