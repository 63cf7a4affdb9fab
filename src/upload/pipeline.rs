use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::task::{UploadStatus, UploadTask};
use crate::backend::SessionBackend;
use crate::capture::RecordingArtifact;
use crate::config::UploadSettings;
use crate::error::SessionError;

/// Backend hard limit on a single artifact payload
const MAX_ARTIFACT_BYTES: u64 = 500 * 1024 * 1024;

/// Transports finished artifacts to the backend
///
/// One live transfer per artifact: resubmitting while a task is pending,
/// in flight, or already succeeded returns the existing task; only a
/// terminally failed task is replaced, which is how manual retry works.
/// Transient errors are retried with bounded exponential backoff; the
/// local file is released only after the backend acknowledges receipt and
/// preserved on any terminal failure.
pub struct UploadPipeline {
    backend: Arc<dyn SessionBackend>,
    settings: UploadSettings,
    active: Mutex<HashMap<String, Arc<UploadTask>>>,
}

impl UploadPipeline {
    pub fn new(backend: Arc<dyn SessionBackend>, settings: UploadSettings) -> Self {
        Self {
            backend,
            settings,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an artifact for delivery
    pub fn submit(&self, artifact: RecordingArtifact) -> Arc<UploadTask> {
        let mut active = self.active.lock().expect("upload registry lock poisoned");

        if let Some(existing) = active.get(&artifact.session_id) {
            match existing.status() {
                UploadStatus::Failed { .. } => {
                    info!(
                        "Replacing failed upload task for session {}",
                        artifact.session_id
                    );
                }
                _ => {
                    info!(
                        "Upload for session {} already live, returning existing task",
                        artifact.session_id
                    );
                    return Arc::clone(existing);
                }
            }
        }

        let task = Arc::new(UploadTask::new(artifact));
        active.insert(task.artifact().session_id.clone(), Arc::clone(&task));

        let worker = tokio::spawn(Self::deliver(
            Arc::clone(&self.backend),
            self.settings.clone(),
            Arc::clone(&task),
        ));
        task.attach_worker(worker);

        task
    }

    /// The task currently tracked for a session, if any
    pub fn task_for(&self, session_id: &str) -> Option<Arc<UploadTask>> {
        self.active
            .lock()
            .expect("upload registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    async fn deliver(
        backend: Arc<dyn SessionBackend>,
        settings: UploadSettings,
        task: Arc<UploadTask>,
    ) {
        let session_id = task.artifact().session_id.clone();
        let max_attempts = settings.max_attempts.max(1);
        let mut attempt: u32 = 1;

        if task.artifact().size_bytes > MAX_ARTIFACT_BYTES {
            // The backend would refuse it with a 400; skip the transfer
            task.set_status(UploadStatus::Failed {
                reason: format!(
                    "artifact is {} bytes, over the {} byte limit",
                    task.artifact().size_bytes,
                    MAX_ARTIFACT_BYTES
                ),
                retryable: false,
            });
            return;
        }

        loop {
            task.set_status(UploadStatus::InFlight { attempt });

            match backend.upload_artifact(task.artifact()).await {
                Ok(receipt) if receipt.accepted => {
                    info!(
                        "Upload succeeded for session {} on attempt {}",
                        session_id, attempt
                    );
                    task.set_status(UploadStatus::Succeeded);
                    Self::release_local_file(&task).await;
                    return;
                }
                Ok(_) => {
                    // A polite refusal is not a transport problem; retrying
                    // the same bytes will not change the answer
                    task.set_status(UploadStatus::Failed {
                        reason: "backend did not accept the artifact".to_string(),
                        retryable: false,
                    });
                    return;
                }
                Err(e) => {
                    let retryable = Self::is_retryable(&e);

                    if retryable && attempt < max_attempts {
                        let delay = settings.backoff_base() * 2u32.pow(attempt - 1);
                        warn!(
                            "Upload attempt {}/{} for session {} failed ({}), retrying in {:?}",
                            attempt, max_attempts, session_id, e, delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    warn!(
                        "Upload failed for session {} after {} attempt(s): {}",
                        session_id, attempt, e
                    );
                    // Local file intentionally preserved
                    task.set_status(UploadStatus::Failed {
                        reason: e.to_string(),
                        retryable,
                    });
                    return;
                }
            }
        }
    }

    fn is_retryable(error: &SessionError) -> bool {
        // 5xx, timeouts, and rate limits come back as Network; credential
        // and state problems never get better by retrying
        error.is_retryable()
    }

    async fn release_local_file(task: &UploadTask) {
        let path = &task.artifact().local_path;
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not release uploaded artifact {:?}: {}", path, e);
        }
    }
}

/// Surface a terminal upload status as a result
pub fn into_result(artifact: &RecordingArtifact, status: UploadStatus) -> crate::error::Result<()> {
    match status {
        UploadStatus::Succeeded => Ok(()),
        UploadStatus::Failed { reason, retryable } => {
            Err(SessionError::UploadFailed { reason, retryable })
        }
        other => Err(SessionError::UploadFailed {
            reason: format!(
                "upload for session {} ended in non-terminal status {:?}",
                artifact.session_id, other
            ),
            retryable: true,
        }),
    }
}
