use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

use super::consent::ConsentCoordinator;
use super::model::{AnalysisStatus, ConsentDecision, SessionSnapshot, SessionState, SessionStatus};
use super::poller::{PollCanceller, PollEvent, PollHandle, PollOutcome, SessionPoller};
use crate::backend::SessionBackend;
use crate::capture::{CaptureController, CaptureDevice, RecordingArtifact};
use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::upload::{into_result, UploadPipeline, UploadTask};

/// What the driving UI sees
///
/// Mirrors the session states, with `Capturing` and `Uploading` layered on
/// top of `Started` for the local half of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session created yet
    Idle,
    Created,
    AwaitingConsent,
    BothConsented,
    Started,
    Capturing,
    Uploading,
    /// The artifact was acknowledged by the backend
    Uploaded,
    Cancelled,
    Expired,
}

impl SessionPhase {
    fn from_state(state: SessionState) -> Self {
        match state {
            SessionState::Created => SessionPhase::Created,
            SessionState::AwaitingConsent => SessionPhase::AwaitingConsent,
            SessionState::BothConsented => SessionPhase::BothConsented,
            SessionState::Started => SessionPhase::Started,
            SessionState::Cancelled => SessionPhase::Cancelled,
            SessionState::Expired => SessionPhase::Expired,
        }
    }

    /// No further protocol-relevant transition happens from here
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Uploaded | SessionPhase::Cancelled | SessionPhase::Expired
        )
    }
}

/// End-to-end driver for one recording session
///
/// The single stateful object a UI holds: create, consent, wait for the
/// other party, start, capture, upload. Every phase change is published on
/// a watch channel, and operations invalid for the current phase are
/// rejected with a descriptive error rather than silently ignored.
pub struct SessionOrchestrator {
    backend: Arc<dyn SessionBackend>,
    consent: ConsentCoordinator,
    poller: SessionPoller,
    uploads: UploadPipeline,
    config: Config,
    session: RwLock<Option<SessionSnapshot>>,
    phase_tx: Arc<watch::Sender<SessionPhase>>,
    poll_cancel: Mutex<Option<PollCanceller>>,
    capture: Mutex<Option<CaptureController>>,
    upload_task: Mutex<Option<Arc<UploadTask>>>,
}

impl SessionOrchestrator {
    pub fn new(backend: Arc<dyn SessionBackend>, config: Config) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);

        Self {
            consent: ConsentCoordinator::new(Arc::clone(&backend)),
            poller: SessionPoller::new(Arc::clone(&backend), config.polling.clone()),
            uploads: UploadPipeline::new(Arc::clone(&backend), config.upload.clone()),
            backend,
            config,
            session: RwLock::new(None),
            phase_tx: Arc::new(phase_tx),
            poll_cancel: Mutex::new(None),
            capture: Mutex::new(None),
            upload_task: Mutex::new(None),
        }
    }

    /// Observe phase changes
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    pub async fn session(&self) -> Option<SessionSnapshot> {
        self.session.read().await.clone()
    }

    fn set_phase(&self, next: SessionPhase) {
        let current = self.phase();
        if current != next {
            info!("Phase {:?} -> {:?}", current, next);
            // send_replace: the phase must advance even with no subscribers
            self.phase_tx.send_replace(next);
        }
    }

    async fn require_session(&self) -> Result<SessionSnapshot> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(SessionError::NoSession)
    }

    /// Create a session with the caller as initiator
    ///
    /// Only valid when no session is active; a finished (terminal) session
    /// may be followed by a fresh one on the same orchestrator.
    pub async fn create_session(&self, participant: &str) -> Result<SessionSnapshot> {
        if let Some(existing) = self.session.read().await.clone() {
            if !self.phase().is_terminal() {
                return Err(SessionError::StaleSession {
                    session_id: existing.id,
                    state: existing.state,
                });
            }
        }

        let snapshot = self.backend.create_session(participant).await?;
        self.consent.register(&snapshot).await;

        *self.session.write().await = Some(snapshot.clone());
        self.set_phase(SessionPhase::from_state(snapshot.state));

        Ok(snapshot)
    }

    /// Adopt a session created by the other party (the invited side)
    pub async fn join_session(&self, session_id: &str) -> Result<SessionStatus> {
        if let Some(existing) = self.session.read().await.clone() {
            if !self.phase().is_terminal() {
                return Err(SessionError::StaleSession {
                    session_id: existing.id,
                    state: existing.state,
                });
            }
        }

        let status = self.backend.poll_status(session_id).await?;
        self.consent.observe(&status).await;

        *self.session.write().await = Some(SessionSnapshot {
            id: status.session_id.clone(),
            initiator: String::new(),
            participant: String::new(),
            state: status.state,
        });
        self.set_phase(SessionPhase::from_state(status.state));

        Ok(status)
    }

    /// Submit this participant's consent decision
    pub async fn submit_consent(&self, decision: ConsentDecision) -> Result<SessionStatus> {
        let snapshot = self.require_session().await?;

        let status = self.consent.submit_consent(&snapshot.id, decision).await;

        match status {
            Ok(status) => {
                self.adopt_state(status.state).await;
                Ok(status)
            }
            Err(SessionError::StaleSession { session_id, state }) => {
                self.adopt_state(state).await;
                Err(SessionError::StaleSession { session_id, state })
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the consent phase settles, then report the outcome
    ///
    /// Returns the settled status (`BothConsented`/`Started`, or
    /// `Cancelled`/`Expired` for the caller to present as terminal).
    /// Degraded networking past the poll budget surfaces as
    /// `PollExhausted`.
    pub async fn wait_for_ready(&self) -> Result<SessionStatus> {
        let snapshot = self.require_session().await?;

        let mut handle = self.poller.watch(&snapshot.id);
        *self.poll_cancel.lock().await = Some(handle.canceller());

        let outcome = self.consume_poll_events(&snapshot, &mut handle).await;

        // The watch is over either way; drop the means of cancelling it
        *self.poll_cancel.lock().await = None;
        outcome
    }

    async fn consume_poll_events(
        &self,
        snapshot: &SessionSnapshot,
        handle: &mut PollHandle,
    ) -> Result<SessionStatus> {
        loop {
            match handle.next_event().await {
                Some(PollEvent::Update(status)) => {
                    self.consent.observe(&status).await;
                    self.adopt_state(status.state).await;
                }
                Some(PollEvent::Terminal(PollOutcome::Settled(status))) => {
                    self.consent.observe(&status).await;
                    self.adopt_state(status.state).await;
                    return Ok(status);
                }
                Some(PollEvent::Terminal(PollOutcome::Exhausted { failures })) => {
                    return Err(SessionError::PollExhausted { failures });
                }
                Some(PollEvent::Terminal(PollOutcome::Failed(e))) => {
                    return Err(e);
                }
                None => {
                    // Cancelled from the outside
                    let state = self
                        .consent
                        .known_state(&snapshot.id)
                        .await
                        .unwrap_or(snapshot.state);
                    return Err(SessionError::StaleSession {
                        session_id: snapshot.id.clone(),
                        state,
                    });
                }
            }
        }
    }

    /// Start the session once both parties have consented
    pub async fn start(&self) -> Result<SessionState> {
        let snapshot = self.require_session().await?;

        match self.consent.known_state(&snapshot.id).await {
            Some(SessionState::BothConsented) | Some(SessionState::Started) => {}
            Some(state) if state.is_terminal() => {
                return Err(SessionError::StaleSession {
                    session_id: snapshot.id,
                    state,
                });
            }
            _ => return Err(SessionError::ConsentNotComplete),
        }

        let state = self.backend.start_session(&snapshot.id).await?;
        self.adopt_state(state).await;

        Ok(state)
    }

    /// Begin consent-gated capture
    pub async fn start_capture(&self, device: Box<dyn CaptureDevice>) -> Result<()> {
        let snapshot = self.require_session().await?;

        match self.phase() {
            SessionPhase::Started => {}
            SessionPhase::Capturing => return Err(SessionError::CaptureAlreadyActive),
            SessionPhase::Created
            | SessionPhase::AwaitingConsent
            | SessionPhase::BothConsented => return Err(SessionError::ConsentNotComplete),
            _ => {
                return Err(SessionError::StaleSession {
                    session_id: snapshot.id,
                    state: snapshot.state,
                })
            }
        }

        let mut controller = CaptureController::new(&snapshot.id, self.config.capture.clone());
        controller.arm(SessionState::Started)?;
        controller.start(device).await?;

        *self.capture.lock().await = Some(controller);
        self.set_phase(SessionPhase::Capturing);

        Ok(())
    }

    /// Stop capture and hand back the finished artifact
    pub async fn stop_capture(&self) -> Result<RecordingArtifact> {
        let mut capture = self.capture.lock().await;
        let mut controller = capture.take().ok_or(SessionError::CaptureNotActive)?;
        drop(capture);

        let result = controller.stop().await;

        // Capture is over either way; the session itself is still started,
        // and a failure must be surfaced, never papered over
        self.set_phase(SessionPhase::Started);
        result
    }

    /// Queue the artifact for delivery; completion via `await_upload`
    pub async fn upload(&self, artifact: RecordingArtifact) -> Result<Arc<UploadTask>> {
        let snapshot = self.require_session().await?;

        if artifact.session_id != snapshot.id {
            return Err(SessionError::UploadFailed {
                reason: format!(
                    "artifact belongs to session {}, not {}",
                    artifact.session_id, snapshot.id
                ),
                retryable: false,
            });
        }

        match self.phase() {
            SessionPhase::Started | SessionPhase::Uploading => {}
            SessionPhase::Capturing => return Err(SessionError::CaptureAlreadyActive),
            _ => {
                return Err(SessionError::StaleSession {
                    session_id: snapshot.id,
                    state: snapshot.state,
                })
            }
        }

        let task = self.uploads.submit(artifact);
        *self.upload_task.lock().await = Some(Arc::clone(&task));
        self.set_phase(SessionPhase::Uploading);

        Ok(task)
    }

    /// Wait for the queued upload to finish and report the outcome
    pub async fn await_upload(&self) -> Result<()> {
        let task = self
            .upload_task
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NoSession)?;

        let status = task.wait().await;
        let result = into_result(task.artifact(), status);

        match &result {
            Ok(()) => self.set_phase(SessionPhase::Uploaded),
            Err(e) => {
                warn!("Upload did not complete: {}", e);
                // Back to Started so the caller can retry manually
                self.set_phase(SessionPhase::Started);
            }
        }

        result
    }

    /// Backend analysis progress for the uploaded artifact
    pub async fn analysis_status(&self) -> Result<AnalysisStatus> {
        let snapshot = self.require_session().await?;
        self.backend.analysis_status(&snapshot.id).await
    }

    /// Tear down everything in flight
    ///
    /// Cancels the poller, aborts active capture, and kills the upload
    /// retry loop; no timer or worker outlives this call.
    pub async fn cancel(&self) {
        if let Some(canceller) = self.poll_cancel.lock().await.take() {
            canceller.cancel();
        }

        if let Some(mut controller) = self.capture.lock().await.take() {
            controller.abort().await;
        }

        if let Some(task) = self.upload_task.lock().await.take() {
            task.abort();
        }

        if !matches!(self.phase(), SessionPhase::Uploaded) {
            self.set_phase(SessionPhase::Cancelled);
        }

        info!("Session flow cancelled");
    }

    async fn adopt_state(&self, state: SessionState) {
        let mut session = self.session.write().await;
        if let Some(snapshot) = session.as_mut() {
            snapshot.state = state;
        }
        drop(session);

        // Capturing/Uploading are local refinements of Started; a poll
        // answering Started must not knock the UI out of them
        let next = SessionPhase::from_state(state);
        let current = self.phase();
        let local_refinement = matches!(
            current,
            SessionPhase::Capturing | SessionPhase::Uploading | SessionPhase::Uploaded
        ) && next == SessionPhase::Started;

        if !local_refinement {
            self.set_phase(next);
        }
    }
}
