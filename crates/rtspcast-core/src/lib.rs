pub mod control;
pub mod engine;
pub mod error;
pub mod publisher;
pub mod service;
pub mod session;
pub mod types;

#[cfg(test)]
mod mock;

pub use control::CaptureController;
pub use engine::{connect_with_retry, Backoff, CaptureEngine, FailureCounter, RetryPolicy};
pub use error::{CaptureError, CaptureResult, PublishError};
pub use publisher::Publisher;
pub use service::{CaptureService, StreamSettings};
pub use session::CaptureSession;
pub use types::Frame;
