use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::artifact::{ArtifactWriter, RecordingArtifact};
use super::device::{CaptureDevice, DeviceEvent};
use crate::config::CaptureSettings;
use crate::error::{Result, SessionError};
use crate::session::SessionState;

/// Capture lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// Nothing armed or running
    Idle,
    /// Consent gate passed, device not yet started
    Armed,
    /// Frames are being captured and persisted
    Recording,
    /// Stop received (or ceiling hit), artifact being finalized
    Finalizing,
    /// Artifact complete and available
    Ready,
    /// Device or capture failure; no usable artifact from this controller
    Aborted,
}

/// Consent-gated recording driver for one session
///
/// Holds the single active recording for its session. Capture may only be
/// armed once the session has reached `Started`, and the controller itself
/// enforces the maximum-duration ceiling on frame media time, so a device
/// that never stops cannot produce an over-long artifact.
pub struct CaptureController {
    session_id: String,
    settings: CaptureSettings,
    state: Arc<RwLock<CaptureState>>,
    device: Option<Box<dyn CaptureDevice>>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<Result<RecordingArtifact>>>,
}

impl CaptureController {
    pub fn new(session_id: impl Into<String>, settings: CaptureSettings) -> Self {
        Self {
            session_id: session_id.into(),
            settings,
            state: Arc::new(RwLock::new(CaptureState::Idle)),
            device: None,
            stop_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.read().expect("capture state lock poisoned")
    }

    fn set_state(state: &Arc<RwLock<CaptureState>>, next: CaptureState) {
        *state.write().expect("capture state lock poisoned") = next;
    }

    /// Pass the consent gate
    ///
    /// Arming is only legal once the session is `Started`; anything earlier
    /// means consent is not complete, anything later means the session is
    /// over.
    pub fn arm(&mut self, session_state: SessionState) -> Result<()> {
        match session_state {
            SessionState::Started => {}
            SessionState::Created
            | SessionState::AwaitingConsent
            | SessionState::BothConsented => return Err(SessionError::ConsentNotComplete),
            state => {
                return Err(SessionError::StaleSession {
                    session_id: self.session_id.clone(),
                    state,
                })
            }
        }

        if self.state() != CaptureState::Idle {
            return Err(SessionError::CaptureAlreadyActive);
        }

        Self::set_state(&self.state, CaptureState::Armed);
        info!("Capture armed for session {}", self.session_id);
        Ok(())
    }

    /// Begin capturing from the device
    pub async fn start(&mut self, mut device: Box<dyn CaptureDevice>) -> Result<()> {
        match self.state() {
            CaptureState::Armed => {}
            CaptureState::Recording | CaptureState::Finalizing => {
                return Err(SessionError::CaptureAlreadyActive)
            }
            _ => return Err(SessionError::CaptureNotActive),
        }

        let events = match device.start().await {
            Ok(rx) => rx,
            Err(e) => {
                Self::set_state(&self.state, CaptureState::Aborted);
                return Err(match e {
                    SessionError::CaptureUnavailable(_) => e,
                    other => SessionError::CaptureUnavailable(other.to_string()),
                });
            }
        };

        let writer = match ArtifactWriter::create(
            std::path::Path::new(&self.settings.output_dir),
            &self.session_id,
            self.settings.sample_rate,
            self.settings.channels,
        ) {
            Ok(w) => w,
            Err(e) => {
                let _ = device.stop().await;
                Self::set_state(&self.state, CaptureState::Aborted);
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(Self::record_loop(
            Arc::clone(&self.state),
            self.session_id.clone(),
            self.settings.max_duration_secs * 1000,
            events,
            stop_rx,
            writer,
        ));

        Self::set_state(&self.state, CaptureState::Recording);
        self.device = Some(device);
        self.stop_tx = Some(stop_tx);
        self.task = Some(task);

        info!("Recording started for session {}", self.session_id);
        Ok(())
    }

    async fn record_loop(
        state: Arc<RwLock<CaptureState>>,
        session_id: String,
        max_ms: u64,
        mut events: mpsc::Receiver<DeviceEvent>,
        mut stop_rx: watch::Receiver<bool>,
        mut writer: ArtifactWriter,
    ) -> Result<RecordingArtifact> {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    info!("Stop requested for session {}", session_id);
                    break;
                }
                event = events.recv() => match event {
                    Some(DeviceEvent::Frame(frame)) => {
                        // The ceiling is enforced here, on media time, not
                        // delegated to the device
                        if frame.timestamp_ms >= max_ms {
                            info!(
                                "Session {} hit the {}ms capture ceiling, auto-stopping",
                                session_id, max_ms
                            );
                            break;
                        }

                        if let Err(e) = writer.write_frame(&frame) {
                            Self::set_state(&state, CaptureState::Aborted);
                            let partial = if writer.has_frames() {
                                writer.finish().ok()
                            } else {
                                None
                            };
                            return Err(SessionError::CaptureFailedMidRecording {
                                reason: e.to_string(),
                                partial,
                            });
                        }
                    }
                    Some(DeviceEvent::Fault(reason)) => {
                        warn!("Device fault for session {}: {}", session_id, reason);
                        Self::set_state(&state, CaptureState::Aborted);
                        let partial = if writer.has_frames() {
                            writer.finish().ok()
                        } else {
                            None
                        };
                        return Err(SessionError::CaptureFailedMidRecording { reason, partial });
                    }
                    // Device ended on its own
                    None => break,
                }
            }
        }

        Self::set_state(&state, CaptureState::Finalizing);
        let artifact = writer.finish()?;
        Self::set_state(&state, CaptureState::Ready);

        info!(
            "Capture ready for session {}: {:?} ({} ms, {} bytes)",
            session_id, artifact.local_path, artifact.duration_ms, artifact.size_bytes
        );

        Ok(artifact)
    }

    /// Stop capturing and return the finished artifact
    ///
    /// Also collects the artifact after an automatic ceiling stop. Errors
    /// from the recording task (device fault, write failure) surface here.
    pub async fn stop(&mut self) -> Result<RecordingArtifact> {
        // Aborted still passes: the recording task holds the failure and
        // the partial artifact, and stop() is where they surface
        match self.state() {
            CaptureState::Idle | CaptureState::Armed => {
                return Err(SessionError::CaptureNotActive)
            }
            _ => {}
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop().await {
                warn!("Device stop failed: {}", e);
            }
        }

        let task = self.task.take().ok_or(SessionError::CaptureNotActive)?;
        match task.await {
            Ok(result) => result,
            Err(e) => {
                Self::set_state(&self.state, CaptureState::Aborted);
                Err(SessionError::CaptureFailedMidRecording {
                    reason: format!("recording task failed: {}", e),
                    partial: None,
                })
            }
        }
    }

    /// Tear down without producing an artifact (session cancelled)
    pub async fn abort(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        if let Some(mut device) = self.device.take() {
            let _ = device.stop().await;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }

        if self.state() != CaptureState::Ready {
            Self::set_state(&self.state, CaptureState::Aborted);
        }

        info!("Capture aborted for session {}", self.session_id);
    }
}
