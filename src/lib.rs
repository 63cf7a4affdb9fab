pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod session;
pub mod upload;

pub use backend::{
    CredentialProvider, HttpBackend, MemoryBackend, SessionBackend, StaticToken, UploadReceipt,
};
pub use capture::{
    CaptureController, CaptureDevice, CaptureState, DeviceEvent, MediaFrame, RecordingArtifact,
    SyntheticDevice, SyntheticDeviceConfig,
};
pub use config::Config;
pub use error::{Result, SessionError};
pub use session::{
    AnalysisStatus, ConsentCoordinator, ConsentDecision, ConsentRecord, SessionOrchestrator,
    SessionPhase, SessionPoller, SessionSnapshot, SessionState, SessionStatus,
};
pub use upload::{UploadPipeline, UploadStatus, UploadTask};
