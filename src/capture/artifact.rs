use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::device::MediaFrame;
use crate::error::{Result, SessionError};

/// A finished local recording, pending transport to the backend
///
/// Owned by the capture controller until handed to the upload pipeline,
/// which releases the local file only after the backend acknowledges
/// receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingArtifact {
    pub session_id: String,
    /// Opaque handle to the bytes on this device
    pub local_path: PathBuf,
    pub content_type: String,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

/// Writes captured frames to a WAV file on disk
pub struct ArtifactWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    session_id: String,
    path: PathBuf,
    end_ms: u64,
    frames_written: u64,
}

impl ArtifactWriter {
    pub fn create(
        output_dir: &Path,
        session_id: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        fs::create_dir_all(output_dir)?;

        let path = output_dir.join(format!("{}.wav", session_id));
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            SessionError::CaptureUnavailable(format!(
                "cannot create artifact file {:?}: {}",
                path, e
            ))
        })?;

        Ok(Self {
            writer: Some(writer),
            session_id: session_id.to_string(),
            path,
            end_ms: 0,
            frames_written: 0,
        })
    }

    /// Whether any media has been persisted yet
    pub fn has_frames(&self) -> bool {
        self.frames_written > 0
    }

    pub fn write_frame(&mut self, frame: &MediaFrame) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in &frame.samples {
                writer.write_sample(sample).map_err(|e| {
                    SessionError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("failed to write sample: {}", e),
                    ))
                })?;
            }

            self.end_ms = frame.timestamp_ms + frame.duration_ms();
            self.frames_written += 1;
        }

        Ok(())
    }

    /// Finalize the file and describe what was captured
    pub fn finish(mut self) -> Result<RecordingArtifact> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| {
                SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("failed to finalize artifact: {}", e),
                ))
            })?;
        }

        let size_bytes = fs::metadata(&self.path)?.len();

        Ok(RecordingArtifact {
            session_id: self.session_id.clone(),
            local_path: self.path.clone(),
            content_type: "audio/wav".to_string(),
            duration_ms: self.end_ms,
            size_bytes,
        })
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize artifact writer on drop: {}", e);
            }
        }
    }
}
