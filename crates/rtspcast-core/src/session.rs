//! Capture session state machine.

use chrono::{DateTime, Utc};
use rtspcast_protocol::{CaptureStatus, StatusSnapshot};

use crate::error::{CaptureError, CaptureResult};

/// Lifecycle of one capture source. Created once per service and cycled, never replaced.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    rtsp_url: String,
    status: CaptureStatus,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl CaptureSession {
    pub fn new(rtsp_url: impl Into<String>) -> Self {
        Self {
            rtsp_url: rtsp_url.into(),
            status: CaptureStatus::Stopped,
            started_at: None,
            stopped_at: None,
            error_message: None,
        }
    }

    pub fn rtsp_url(&self) -> &str {
        &self.rtsp_url
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, CaptureStatus::Starting | CaptureStatus::Running)
    }

    pub fn can_start(&self) -> bool {
        matches!(self.status, CaptureStatus::Stopped | CaptureStatus::Error)
    }

    pub fn can_stop(&self) -> bool {
        self.is_active()
    }

    /// Stopped | Error → Starting
    pub fn start(&mut self) -> CaptureResult<()> {
        if !self.can_start() {
            return Err(self.rejected("start"));
        }
        self.status = CaptureStatus::Starting;
        self.started_at = Some(Utc::now());
        self.stopped_at = None;
        self.error_message = None;
        Ok(())
    }

    /// Starting → Running
    pub fn mark_running(&mut self) -> CaptureResult<()> {
        if self.status != CaptureStatus::Starting {
            return Err(self.rejected("mark running"));
        }
        self.status = CaptureStatus::Running;
        Ok(())
    }

    /// Starting | Running → Stopping
    pub fn stop(&mut self) -> CaptureResult<()> {
        if !self.can_stop() {
            return Err(self.rejected("stop"));
        }
        self.status = CaptureStatus::Stopping;
        Ok(())
    }

    /// Stopping → Stopped
    pub fn mark_stopped(&mut self) -> CaptureResult<()> {
        if self.status != CaptureStatus::Stopping {
            return Err(self.rejected("mark stopped"));
        }
        self.status = CaptureStatus::Stopped;
        self.stopped_at = Some(Utc::now());
        Ok(())
    }

    /// Any state → Error. Always succeeds.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = CaptureStatus::Error;
        self.error_message = Some(message.into());
        self.stopped_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            rtsp_url: self.rtsp_url.clone(),
            is_active: self.is_active(),
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            error_message: self.error_message.clone(),
        }
    }

    fn rejected(&self, action: &str) -> CaptureError {
        CaptureError::InvalidOperation(format!("cannot {action} capture while {}", self.status))
    }
}
