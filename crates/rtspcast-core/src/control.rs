//! Audited dispatch of control commands to the capture service.

use rtspcast_protocol::{AuditKind, ControlAction, ControlCommand, StatusSnapshot};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::service::CaptureService;

/// Front door for start/stop/status requests from any transport.
///
/// Every command is recorded through the publisher's audit log before and
/// after it runs.
#[derive(Clone)]
pub struct CaptureController {
    service: CaptureService,
}

impl CaptureController {
    pub fn new(service: CaptureService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &CaptureService {
        &self.service
    }

    pub async fn handle(&self, command: ControlCommand) -> CaptureResult<StatusSnapshot> {
        let subject = command.subject().to_string();
        let request_metadata = command.metadata.clone().unwrap_or_else(|| json!({}));
        info!(client = %subject, action = command.action.as_str(), "Control command received");

        match command.action {
            ControlAction::Start => {
                self.audit(AuditKind::CaptureStartCommand, &subject, request_metadata)
                    .await;
                let result = self.service.start_capture().await;
                self.finish(
                    result,
                    &subject,
                    AuditKind::CaptureStarted,
                    AuditKind::CaptureStartFailed,
                )
                .await
            }
            ControlAction::Stop => {
                self.audit(AuditKind::CaptureStopCommand, &subject, request_metadata)
                    .await;
                let result = self.service.stop_capture().await;
                self.finish(
                    result,
                    &subject,
                    AuditKind::CaptureStopped,
                    AuditKind::CaptureStopFailed,
                )
                .await
            }
            ControlAction::Status => {
                self.audit(AuditKind::CaptureStatusRequest, &subject, request_metadata)
                    .await;
                Ok(self.service.publish_status().await)
            }
        }
    }

    async fn finish(
        &self,
        result: CaptureResult<StatusSnapshot>,
        subject: &str,
        succeeded: AuditKind,
        failed: AuditKind,
    ) -> CaptureResult<StatusSnapshot> {
        match result {
            Ok(snapshot) => {
                let metadata = json!({
                    "rtsp_url": snapshot.rtsp_url,
                    "status": snapshot.status,
                });
                self.audit(succeeded, subject, metadata).await;
                Ok(snapshot)
            }
            Err(e) => {
                self.audit(failed, subject, json!({ "error": e.to_string() }))
                    .await;
                if matches!(e, CaptureError::InvalidOperation(_)) {
                    // Let the requester see the state that rejected it
                    self.service.publish_status().await;
                }
                Err(e)
            }
        }
    }

    async fn audit(&self, kind: AuditKind, subject: &str, metadata: Value) {
        if let Err(e) = self
            .service
            .publisher()
            .log_event(kind, subject, metadata)
            .await
        {
            warn!("Failed to record {} for {}: {}", kind, subject, e);
        }
    }
}
