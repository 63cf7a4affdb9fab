//! Consent-gated media capture
//!
//! This module provides the capture side of a session:
//! - `CaptureController` - the Idle/Armed/Recording/Finalizing state
//!   machine, gated on session readiness and enforcing the duration ceiling
//! - `CaptureDevice` - the seam platform capture sits behind
//! - `ArtifactWriter` / `RecordingArtifact` - persistence of captured
//!   frames and the handle passed on to upload

pub mod artifact;
pub mod controller;
pub mod device;

pub use artifact::{ArtifactWriter, RecordingArtifact};
pub use controller::{CaptureController, CaptureState};
pub use device::{CaptureDevice, DeviceEvent, MediaFrame, SyntheticDevice, SyntheticDeviceConfig};
