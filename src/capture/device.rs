use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Result, SessionError};

/// Captured media samples (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Raw samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Media time in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl MediaFrame {
    /// Length of this frame in media time
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// What a device delivers while capturing
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Frame(MediaFrame),
    /// The device failed after capture began; no more frames will follow
    Fault(String),
}

/// Capture device seam
///
/// Platform capture (camera/microphone stacks) sits behind this trait; the
/// controller only sees the event stream. `SyntheticDevice` generates
/// frames in-process for tests and the demo flow.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Begin capturing
    ///
    /// Returns a channel receiver that will receive device events. Errors
    /// here mean the device could not be opened at all.
    async fn start(&mut self) -> Result<mpsc::Receiver<DeviceEvent>>;

    /// Stop capturing; the event channel closes once in-flight frames drain
    async fn stop(&mut self) -> Result<()>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Configuration for the synthetic device
#[derive(Debug, Clone)]
pub struct SyntheticDeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Media length of each generated frame
    pub frame_ms: u64,
    /// Stop on its own after this many frames (None = run until stopped)
    pub frame_limit: Option<u64>,
    /// Emit a fault after this many frames, for failure-path testing
    pub fault_after: Option<u64>,
}

impl Default for SyntheticDeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_ms: 100,
            frame_limit: None,
            fault_after: None,
        }
    }
}

/// In-process device generating silent PCM frames at capture cadence
pub struct SyntheticDevice {
    config: SyntheticDeviceConfig,
    running: Arc<AtomicBool>,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticDeviceConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<DeviceEvent>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SessionError::CaptureUnavailable(
                "synthetic device already running".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let samples_per_frame =
                (config.sample_rate as u64 * config.frame_ms / 1000) as usize
                    * config.channels as usize;
            let mut index: u64 = 0;

            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                if let Some(limit) = config.frame_limit {
                    if index >= limit {
                        break;
                    }
                }

                if let Some(fault_after) = config.fault_after {
                    if index >= fault_after {
                        warn!("Synthetic device injecting fault after {} frames", index);
                        let _ = tx
                            .send(DeviceEvent::Fault("simulated device failure".to_string()))
                            .await;
                        break;
                    }
                }

                let frame = MediaFrame {
                    samples: vec![0i16; samples_per_frame],
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    timestamp_ms: index * config.frame_ms,
                };

                if tx.send(DeviceEvent::Frame(frame)).await.is_err() {
                    // Receiver gone; capture was torn down
                    break;
                }

                index += 1;
                tokio::time::sleep(Duration::from_millis(config.frame_ms)).await;
            }

            running.store(false, Ordering::SeqCst);
        });

        info!("Synthetic device started");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
