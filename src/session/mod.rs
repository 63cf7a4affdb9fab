//! Session lifecycle and consent protocol
//!
//! This module provides the session core:
//! - The session/consent data model and state machine
//! - `ConsentCoordinator` - serialized consent submission and the pure
//!   reconciliation function
//! - `SessionPoller` - cancellable status polling until readiness settles
//! - `SessionOrchestrator` - the end-to-end flow a UI drives

pub mod consent;
pub mod model;
pub mod orchestrator;
pub mod poller;

pub use consent::{evaluate, ConsentCoordinator};
pub use model::{
    AnalysisStatus, ConsentDecision, ConsentRecord, SessionSnapshot, SessionState, SessionStatus,
};
pub use orchestrator::{SessionOrchestrator, SessionPhase};
pub use poller::{PollCanceller, PollEvent, PollHandle, PollOutcome, SessionPoller};
