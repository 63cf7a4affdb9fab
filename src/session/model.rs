use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a recording session
///
/// Transitions are monotonic in the order below, with two exceptions:
/// `Cancelled` is reachable from any non-terminal state, and `Expired` is
/// reachable only from `AwaitingConsent`/`BothConsented` when the backend
/// times the session out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session exists, no consent decision recorded yet
    Created,
    /// At least one decision recorded, still waiting on the pair
    AwaitingConsent,
    /// Both participants granted consent
    BothConsented,
    /// Recording has been started by the initiator
    Started,
    /// A participant declined, or the session was cancelled outright
    Cancelled,
    /// Consent was not completed before the backend's deadline
    Expired,
}

impl SessionState {
    /// Terminal for the whole protocol: nothing further can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Cancelled | SessionState::Expired)
    }

    /// Terminal for polling purposes: the consent phase is settled
    pub fn is_poll_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::BothConsented
                | SessionState::Started
                | SessionState::Cancelled
                | SessionState::Expired
        )
    }

    /// Whether consent submissions are still accepted in this state
    pub fn accepts_consent(&self) -> bool {
        matches!(self, SessionState::Created | SessionState::AwaitingConsent)
    }
}

/// One participant's decision for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    /// No decision yet
    Pending,
    /// Explicit agreement to be recorded
    Granted,
    /// Explicit refusal; absorbing for the whole session
    Declined,
}

/// A recorded consent decision
///
/// The backend keeps at most one record per (session, participant) pair;
/// a later submission from the same participant replaces the earlier one
/// while the session still accepts consent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub session_id: String,
    pub participant: String,
    pub decision: ConsentDecision,
    pub timestamp: DateTime<Utc>,
}

/// The backend's reconciled view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Backend-assigned identifier, immutable after creation
    pub id: String,

    /// The party that created the session
    pub initiator: String,

    /// The invited second party
    pub participant: String,

    pub state: SessionState,
}

/// Side-effect-free status as returned by the poll endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub initiator_consent: bool,
    pub participant_consent: bool,
    pub both_consented: bool,
}

/// Backend-side analysis progress for an uploaded recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStatus {
    pub session_id: String,
    /// "processing" or "completed", as reported by the backend
    pub status: String,
    pub results_available: bool,
}
