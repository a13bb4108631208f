//! Outbound sinks for frames, status and audit events.

use async_trait::async_trait;
use rtspcast_protocol::{AuditKind, StatusSnapshot};

use crate::error::PublishError;
use crate::types::Frame;

/// Best-effort delivery to whoever is listening.
///
/// Implementations must not block the caller on slow consumers and should
/// return `Ok` when nobody is connected. Errors are only ever logged by callers.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn send_frame(&self, frame: &Frame) -> Result<(), PublishError>;

    async fn emit_status(&self, snapshot: &StatusSnapshot) -> Result<(), PublishError>;

    async fn log_event(
        &self,
        kind: AuditKind,
        subject: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PublishError>;
}
