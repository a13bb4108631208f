use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// No capture running (initial state)
    Stopped,
    /// Engine is connecting to the source
    Starting,
    /// Frames are being streamed
    Running,
    /// Stop requested, streaming loop winding down
    Stopping,
    /// Last start or run failed; see the session's error message
    Error,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: CaptureStatus,
    pub rtsp_url: String,
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Control actions accepted by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
    Status,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
        }
    }
}

/// A control command with optional requester details for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub action: ControlAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ControlCommand {
    pub fn new(action: ControlAction) -> Self {
        Self {
            action,
            client_id: None,
            metadata: None,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Audit subject for this command
    pub fn subject(&self) -> &str {
        self.client_id.as_deref().unwrap_or("anonymous")
    }
}

/// Audit event kinds recorded around control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CaptureStartCommand,
    CaptureStarted,
    CaptureStartFailed,
    CaptureStopCommand,
    CaptureStopped,
    CaptureStopFailed,
    CaptureStatusRequest,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaptureStartCommand => "capture_start_command",
            Self::CaptureStarted => "capture_started",
            Self::CaptureStartFailed => "capture_start_failed",
            Self::CaptureStopCommand => "capture_stop_command",
            Self::CaptureStopped => "capture_stopped",
            Self::CaptureStopFailed => "capture_stop_failed",
            Self::CaptureStatusRequest => "capture_status_request",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub subject: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// JSON events pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "capture_status")]
    Status(StatusSnapshot),
    #[serde(rename = "log_client_request")]
    Audit(AuditEvent),
    /// Sent only to the connection whose command failed
    #[serde(rename = "command_failed")]
    CommandFailed {
        action: Option<ControlAction>,
        message: String,
    },
}
