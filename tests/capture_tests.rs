// Integration tests for consent-gated capture
//
// The synthetic device generates PCM frames at capture cadence; under
// paused tokio time a "30 minute" recording takes no wall-clock time.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use candor_client::capture::{
    CaptureController, CaptureDevice, CaptureState, DeviceEvent, SyntheticDevice,
    SyntheticDeviceConfig,
};
use candor_client::config::CaptureSettings;
use candor_client::{SessionError, SessionState};

fn settings(dir: &TempDir, max_duration_secs: u64) -> CaptureSettings {
    CaptureSettings {
        output_dir: dir.path().to_string_lossy().to_string(),
        max_duration_secs,
        sample_rate: 16000,
        channels: 1,
    }
}

fn device(config: SyntheticDeviceConfig) -> Box<dyn CaptureDevice> {
    Box::new(SyntheticDevice::new(config))
}

async fn wait_for_state(controller: &CaptureController, want: CaptureState) {
    for _ in 0..10_000 {
        if controller.state() == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {:?}, still {:?}",
        want,
        controller.state()
    );
}

#[tokio::test]
async fn arming_requires_a_started_session() {
    let dir = TempDir::new().unwrap();
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    for state in [
        SessionState::Created,
        SessionState::AwaitingConsent,
        SessionState::BothConsented,
    ] {
        let err = controller.arm(state).unwrap_err();
        assert!(
            matches!(err, SessionError::ConsentNotComplete),
            "arming during {:?} must fail the consent gate",
            state
        );
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    let err = controller.arm(SessionState::Cancelled).unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));

    controller.arm(SessionState::Started).unwrap();
    assert_eq!(controller.state(), CaptureState::Armed);
}

#[tokio::test]
async fn start_before_arm_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    let err = controller
        .start(device(SyntheticDeviceConfig::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CaptureNotActive));
    assert_eq!(controller.state(), CaptureState::Idle);
}

#[tokio::test(start_paused = true)]
async fn records_and_finalizes_an_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    controller.arm(SessionState::Started)?;
    controller
        .start(device(SyntheticDeviceConfig {
            frame_limit: Some(10), // one second of media
            ..SyntheticDeviceConfig::default()
        }))
        .await?;
    assert_eq!(controller.state(), CaptureState::Recording);

    // The device runs out of frames on its own
    wait_for_state(&controller, CaptureState::Ready).await;

    let artifact = controller.stop().await?;
    assert_eq!(artifact.session_id, "session-1");
    assert_eq!(artifact.duration_ms, 1000);
    assert_eq!(artifact.content_type, "audio/wav");
    assert!(artifact.local_path.exists(), "artifact file must exist");
    assert!(
        artifact.size_bytes > 32_000,
        "one second of 16kHz mono PCM is at least 32kB, got {}",
        artifact.size_bytes
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn only_one_recording_per_session() -> Result<()> {
    let dir = TempDir::new()?;
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    controller.arm(SessionState::Started)?;
    controller
        .start(device(SyntheticDeviceConfig::default()))
        .await?;

    let err = controller.arm(SessionState::Started).unwrap_err();
    assert!(matches!(err, SessionError::CaptureAlreadyActive));

    let err = controller
        .start(device(SyntheticDeviceConfig::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CaptureAlreadyActive));

    controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn auto_stops_at_the_duration_ceiling() -> Result<()> {
    let dir = TempDir::new()?;
    // Two second ceiling; same enforcement path as the production 1800s cap
    let mut controller = CaptureController::new("session-1", settings(&dir, 2));

    controller.arm(SessionState::Started)?;
    controller
        .start(device(SyntheticDeviceConfig {
            frame_limit: None, // the device would run forever
            ..SyntheticDeviceConfig::default()
        }))
        .await?;

    // No external stop signal: the controller cuts the recording off on
    // its own when a frame reaches the ceiling
    wait_for_state(&controller, CaptureState::Ready).await;

    let artifact = controller.stop().await?;
    assert_eq!(
        artifact.duration_ms, 2000,
        "media past the ceiling must not be persisted"
    );

    Ok(())
}

#[test]
fn default_ceiling_is_thirty_minutes() {
    assert_eq!(CaptureSettings::default().max_duration_secs, 1800);
}

#[tokio::test(start_paused = true)]
async fn production_ceiling_cuts_off_at_thirty_minutes_of_media() -> Result<()> {
    let dir = TempDir::new()?;
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    controller.arm(SessionState::Started)?;
    // Minute-long low-rate frames keep the test cheap; the frame that
    // lands on 1_800_000 ms must not be persisted
    controller
        .start(device(SyntheticDeviceConfig {
            sample_rate: 100,
            channels: 1,
            frame_ms: 60_000,
            frame_limit: None,
            fault_after: None,
        }))
        .await?;

    // Well past the ceiling in (paused) time; no external stop arrives
    tokio::time::sleep(Duration::from_secs(1900)).await;
    assert_eq!(controller.state(), CaptureState::Ready);

    let artifact = controller.stop().await?;
    assert_eq!(artifact.duration_ms, 1_800_000);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn device_fault_mid_recording_preserves_the_partial_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    controller.arm(SessionState::Started)?;
    controller
        .start(device(SyntheticDeviceConfig {
            fault_after: Some(5),
            ..SyntheticDeviceConfig::default()
        }))
        .await?;

    wait_for_state(&controller, CaptureState::Aborted).await;

    let err = controller.stop().await.unwrap_err();
    match err {
        SessionError::CaptureFailedMidRecording { partial, .. } => {
            let partial = partial.expect("five captured frames make a partial artifact");
            assert_eq!(partial.duration_ms, 500);
            assert!(partial.local_path.exists(), "partial data is never deleted");
        }
        other => panic!("expected CaptureFailedMidRecording, got {:?}", other),
    }

    Ok(())
}

/// A device that cannot be opened at all
struct UnavailableDevice;

#[async_trait]
impl CaptureDevice for UnavailableDevice {
    async fn start(&mut self) -> candor_client::Result<mpsc::Receiver<DeviceEvent>> {
        Err(SessionError::CaptureUnavailable(
            "no camera or microphone present".to_string(),
        ))
    }

    async fn stop(&mut self) -> candor_client::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[tokio::test]
async fn unavailable_device_aborts_before_recording() {
    let dir = TempDir::new().unwrap();
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    controller.arm(SessionState::Started).unwrap();
    let err = controller.start(Box::new(UnavailableDevice)).await.unwrap_err();

    assert!(
        matches!(err, SessionError::CaptureUnavailable(_)),
        "device-open failures are distinct from mid-recording ones"
    );
    assert_eq!(controller.state(), CaptureState::Aborted);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_finalizes_mid_stream() -> Result<()> {
    let dir = TempDir::new()?;
    let mut controller = CaptureController::new("session-1", settings(&dir, 1800));

    controller.arm(SessionState::Started)?;
    controller
        .start(device(SyntheticDeviceConfig::default()))
        .await?;

    // Give the device time to produce some media, then cut it off
    tokio::time::sleep(Duration::from_millis(550)).await;

    let artifact = controller.stop().await?;
    assert!(artifact.duration_ms >= 100, "some media was captured");
    assert!(artifact.duration_ms < 1800_000);
    assert!(artifact.local_path.exists());

    Ok(())
}
