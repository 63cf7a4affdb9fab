//! Artifact transport
//!
//! Takes ownership of a finished recording and delivers it to the backend
//! with bounded retries. Nothing is dropped silently: success releases the
//! local file, terminal failure preserves it and surfaces the reason.

pub mod pipeline;
pub mod task;

pub use pipeline::{into_result, UploadPipeline};
pub use task::{UploadStatus, UploadTask};
