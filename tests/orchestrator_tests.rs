// End-to-end tests for the session orchestrator
//
// Drives the whole flow against the in-process backend: create, consent
// from both devices, poll until ready, start, capture, upload.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use candor_client::config::{CaptureSettings, Config, PollingConfig, UploadSettings};
use candor_client::{
    ConsentDecision, MemoryBackend, SessionBackend, SessionError, SessionOrchestrator, SessionPhase,
    SessionState, SyntheticDevice, SyntheticDeviceConfig,
};

fn test_config(dir: &TempDir) -> Config {
    Config {
        polling: PollingConfig {
            interval_ms: 50,
            failure_budget: 3,
        },
        capture: CaptureSettings {
            output_dir: dir.path().to_string_lossy().to_string(),
            ..CaptureSettings::default()
        },
        upload: UploadSettings {
            max_attempts: 3,
            backoff_base_ms: 100,
        },
        ..Config::default()
    }
}

fn capture_device(frames: u64) -> Box<SyntheticDevice> {
    Box::new(SyntheticDevice::new(SyntheticDeviceConfig {
        frame_limit: Some(frames),
        ..SyntheticDeviceConfig::default()
    }))
}

#[tokio::test(start_paused = true)]
async fn full_flow_from_create_to_uploaded() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");
    let bob = alice.as_participant("bob");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice), test_config(&dir));
    let mut phases = orchestrator.subscribe();
    assert_eq!(orchestrator.phase(), SessionPhase::Idle);

    // Create
    let snapshot = orchestrator.create_session("bob").await?;
    assert_eq!(snapshot.state, SessionState::Created);
    assert_eq!(orchestrator.phase(), SessionPhase::Created);

    // Initiator consents
    let status = orchestrator.submit_consent(ConsentDecision::Granted).await?;
    assert_eq!(status.state, SessionState::AwaitingConsent);
    assert_eq!(orchestrator.phase(), SessionPhase::AwaitingConsent);

    // The other device answers while we poll
    let session_id = snapshot.id.clone();
    let other_device = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        bob.submit_consent(&session_id, ConsentDecision::Granted).await
    });

    let status = orchestrator.wait_for_ready().await?;
    assert_eq!(status.state, SessionState::BothConsented);
    assert!(status.both_consented);
    assert_eq!(orchestrator.phase(), SessionPhase::BothConsented);
    other_device.await??;

    // Start
    let state = orchestrator.start().await?;
    assert_eq!(state, SessionState::Started);
    assert_eq!(orchestrator.phase(), SessionPhase::Started);

    // Capture half a second of media
    orchestrator.start_capture(capture_device(5)).await?;
    assert_eq!(orchestrator.phase(), SessionPhase::Capturing);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let artifact = orchestrator.stop_capture().await?;
    assert_eq!(artifact.duration_ms, 500);
    assert_eq!(orchestrator.phase(), SessionPhase::Started);

    // Upload
    orchestrator.upload(artifact).await?;
    assert_eq!(orchestrator.phase(), SessionPhase::Uploading);
    orchestrator.await_upload().await?;
    assert_eq!(orchestrator.phase(), SessionPhase::Uploaded);

    // The backend has the bytes; analysis proceeds server-side
    let analysis = orchestrator.analysis_status().await?;
    assert!(analysis.results_available);

    // The subscription saw the flow end where we did
    phases.changed().await.ok();
    assert_eq!(*phases.borrow(), SessionPhase::Uploaded);

    Ok(())
}

#[tokio::test]
async fn operations_invalid_for_the_phase_are_rejected_loudly() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");
    let orchestrator = SessionOrchestrator::new(Arc::new(alice), test_config(&dir));

    // Nothing exists yet
    let err = orchestrator
        .submit_consent(ConsentDecision::Granted)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoSession));

    let err = orchestrator.wait_for_ready().await.unwrap_err();
    assert!(matches!(err, SessionError::NoSession));

    let err = orchestrator
        .start_capture(capture_device(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoSession));

    // Created, but consent incomplete: capture stays gated
    orchestrator.create_session("bob").await?;

    let err = orchestrator
        .start_capture(capture_device(1))
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::ConsentNotComplete),
        "capture before Started must fail the consent gate, got {:?}",
        err
    );

    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, SessionError::ConsentNotComplete));

    // A second session while one is live is stale, not a silent overwrite
    let err = orchestrator.create_session("carol").await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));

    let err = orchestrator.stop_capture().await.unwrap_err();
    assert!(matches!(err, SessionError::CaptureNotActive));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn a_decline_cancels_the_whole_flow() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");
    let bob = alice.as_participant("bob");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice), test_config(&dir));
    let snapshot = orchestrator.create_session("bob").await?;

    orchestrator.submit_consent(ConsentDecision::Granted).await?;
    bob.submit_consent(&snapshot.id, ConsentDecision::Declined)
        .await?;

    // The poller observes the cancel and reports it as settled; the UI
    // presents it as terminal
    let status = orchestrator.wait_for_ready().await?;
    assert_eq!(status.state, SessionState::Cancelled);
    assert_eq!(orchestrator.phase(), SessionPhase::Cancelled);

    // Everything after the cancel is stale
    let err = orchestrator
        .submit_consent(ConsentDecision::Granted)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::StaleSession {
            state: SessionState::Cancelled,
            ..
        }
    ));

    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));

    let err = orchestrator
        .start_capture(capture_device(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn degraded_polling_surfaces_as_exhaustion() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice.clone()), test_config(&dir));
    orchestrator.create_session("bob").await?;
    orchestrator.submit_consent(ConsentDecision::Granted).await?;

    alice.fail_next_polls(10).await;

    let err = orchestrator.wait_for_ready().await.unwrap_err();
    assert!(
        matches!(err, SessionError::PollExhausted { failures: 3 }),
        "expected exhaustion at the budget, got {:?}",
        err
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_a_blocking_wait() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");

    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::new(alice),
        test_config(&dir),
    ));
    orchestrator.create_session("bob").await?;
    orchestrator.submit_consent(ConsentDecision::Granted).await?;

    let waiter = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.wait_for_ready().await })
    };

    // Let the poller take a few ticks, then pull the plug
    tokio::time::sleep(Duration::from_millis(200)).await;
    orchestrator.cancel().await;

    let result = waiter.await?;
    assert!(result.is_err(), "a cancelled wait must not report readiness");
    assert_eq!(orchestrator.phase(), SessionPhase::Cancelled);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_capture_aborts_the_recording() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");
    let bob = alice.as_participant("bob");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice), test_config(&dir));
    let snapshot = orchestrator.create_session("bob").await?;
    orchestrator.submit_consent(ConsentDecision::Granted).await?;
    bob.submit_consent(&snapshot.id, ConsentDecision::Granted)
        .await?;
    orchestrator.wait_for_ready().await?;
    orchestrator.start().await?;

    orchestrator
        .start_capture(Box::new(SyntheticDevice::new(SyntheticDeviceConfig::default())))
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    orchestrator.cancel().await;
    assert_eq!(orchestrator.phase(), SessionPhase::Cancelled);

    let err = orchestrator.stop_capture().await.unwrap_err();
    assert!(
        matches!(err, SessionError::CaptureNotActive),
        "the aborted capture is gone, got {:?}",
        err
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn backend_expiry_is_reported_as_terminal() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice.clone()), test_config(&dir));
    let snapshot = orchestrator.create_session("bob").await?;
    orchestrator.submit_consent(ConsentDecision::Granted).await?;

    alice.expire_session(&snapshot.id).await?;

    let status = orchestrator.wait_for_ready().await?;
    assert_eq!(status.state, SessionState::Expired);
    assert_eq!(orchestrator.phase(), SessionPhase::Expired);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn capture_failure_is_surfaced_not_uploaded() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");
    let bob = alice.as_participant("bob");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice), test_config(&dir));
    let snapshot = orchestrator.create_session("bob").await?;
    orchestrator.submit_consent(ConsentDecision::Granted).await?;
    bob.submit_consent(&snapshot.id, ConsentDecision::Granted)
        .await?;
    orchestrator.wait_for_ready().await?;
    orchestrator.start().await?;

    orchestrator
        .start_capture(Box::new(SyntheticDevice::new(SyntheticDeviceConfig {
            fault_after: Some(3),
            ..SyntheticDeviceConfig::default()
        })))
        .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let err = orchestrator.stop_capture().await.unwrap_err();
    match err {
        SessionError::CaptureFailedMidRecording { partial, .. } => {
            assert!(partial.is_some(), "three frames make a partial artifact");
        }
        other => panic!("expected CaptureFailedMidRecording, got {:?}", other),
    }

    assert_eq!(
        orchestrator.phase(),
        SessionPhase::Started,
        "a failed capture never slides into Uploaded"
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_upload_allows_manual_retry() -> Result<()> {
    let dir = TempDir::new()?;
    let alice = MemoryBackend::new("alice");
    let bob = alice.as_participant("bob");

    let orchestrator = SessionOrchestrator::new(Arc::new(alice.clone()), test_config(&dir));
    let snapshot = orchestrator.create_session("bob").await?;
    orchestrator.submit_consent(ConsentDecision::Granted).await?;
    bob.submit_consent(&snapshot.id, ConsentDecision::Granted)
        .await?;
    orchestrator.wait_for_ready().await?;
    orchestrator.start().await?;

    orchestrator.start_capture(capture_device(5)).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let artifact = orchestrator.stop_capture().await?;
    let path = artifact.local_path.clone();

    // The backend is down for longer than the retry budget
    alice.fail_next_uploads(3).await;
    orchestrator.upload(artifact.clone()).await?;

    let err = orchestrator.await_upload().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::UploadFailed {
            retryable: true,
            ..
        }
    ));
    assert_eq!(
        orchestrator.phase(),
        SessionPhase::Started,
        "a failed upload drops back so the UI can offer retry"
    );
    assert!(path.exists(), "the artifact survives the failed upload");

    // Manual retry once the outage clears
    orchestrator.upload(artifact).await?;
    orchestrator.await_upload().await?;
    assert_eq!(orchestrator.phase(), SessionPhase::Uploaded);
    assert!(!path.exists(), "released after the backend acknowledged");

    Ok(())
}
