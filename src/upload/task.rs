use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::capture::RecordingArtifact;

/// Where a transfer stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// Queued, no attempt made yet
    Pending,
    /// An attempt is on the wire
    InFlight { attempt: u32 },
    /// The backend acknowledged receipt; the local file has been released
    Succeeded,
    /// Retry budget exhausted or a non-retryable error; the local file is
    /// preserved for manual retry
    Failed { reason: String, retryable: bool },
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed { .. })
    }
}

/// A durable description of one transfer
///
/// Status is published on a watch channel; any number of observers can
/// `wait()` for the terminal state. The pipeline hands out `Arc<UploadTask>`
/// and returns the same `Arc` for a resubmission of a live transfer.
pub struct UploadTask {
    artifact: RecordingArtifact,
    status_tx: watch::Sender<UploadStatus>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UploadTask {
    pub(crate) fn new(artifact: RecordingArtifact) -> Self {
        let (status_tx, _) = watch::channel(UploadStatus::Pending);
        Self {
            artifact,
            status_tx,
            worker: Mutex::new(None),
        }
    }

    pub fn artifact(&self) -> &RecordingArtifact {
        &self.artifact
    }

    pub fn status(&self) -> UploadStatus {
        self.status_tx.borrow().clone()
    }

    pub(crate) fn set_status(&self, status: UploadStatus) {
        debug!(
            "Upload {} -> {:?}",
            self.artifact.session_id, status
        );
        // send_replace: the value must update even with no subscribers
        self.status_tx.send_replace(status);
    }

    pub(crate) fn attach_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().expect("upload worker lock poisoned") = Some(handle);
    }

    /// Wait for the transfer to reach a terminal status
    pub async fn wait(&self) -> UploadStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Kill the retry loop
    ///
    /// The artifact stays on disk; an aborted transfer reports as a
    /// retryable failure so the caller can resubmit later.
    pub fn abort(&self) {
        if let Some(handle) = self
            .worker
            .lock()
            .expect("upload worker lock poisoned")
            .take()
        {
            handle.abort();
        }

        if !self.status().is_terminal() {
            self.set_status(UploadStatus::Failed {
                reason: "upload cancelled".to_string(),
                retryable: true,
            });
        }
    }
}
