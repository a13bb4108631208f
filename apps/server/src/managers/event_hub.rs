//! Fan-out of capture events and frames to connected clients.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rtspcast_core::{Frame, PublishError, Publisher};
use rtspcast_protocol::{AuditEvent, AuditKind, CaptureStatus, ServerEvent, StatusSnapshot};
use tokio::sync::{broadcast, watch};
use tracing::info;

pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Frames lag far less than events before a subscriber is skipped ahead
const FRAME_BUFFER: usize = 4;

/// `Publisher` over broadcast channels.
///
/// Events go out as serialized JSON, frames as encoded `FramePacket`s. A slow
/// subscriber loses its oldest messages instead of holding anyone else up.
pub struct BroadcastPublisher {
    events: broadcast::Sender<String>,
    frames: broadcast::Sender<Bytes>,
    latest: watch::Sender<Option<Frame>>,
}

impl BroadcastPublisher {
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (latest, _) = watch::channel(None);
        Self {
            events,
            frames,
            latest,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }

    /// Most recently published frame of the current run
    pub fn latest_frame(&self) -> Option<Frame> {
        (*self.latest.borrow()).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn broadcast_event(&self, event: &ServerEvent) -> Result<(), PublishError> {
        let json =
            serde_json::to_string(event).map_err(|e| PublishError::Transport(e.to_string()))?;
        // Err only means nobody is subscribed
        let _ = self.events.send(json);
        Ok(())
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn send_frame(&self, frame: &Frame) -> Result<(), PublishError> {
        self.latest.send_replace(Some(frame.clone()));
        if self.frames.receiver_count() > 0 {
            let _ = self.frames.send(Bytes::from(frame.to_packet().to_bytes()));
        }
        Ok(())
    }

    async fn emit_status(&self, snapshot: &StatusSnapshot) -> Result<(), PublishError> {
        // Frames only stay current while a run is producing them
        if snapshot.status != CaptureStatus::Running {
            self.latest.send_replace(None);
        }
        self.broadcast_event(&ServerEvent::Status(snapshot.clone()))
    }

    async fn log_event(
        &self,
        kind: AuditKind,
        subject: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PublishError> {
        info!(target: "audit", kind = kind.as_str(), subject, %metadata, "Client request");
        self.broadcast_event(&ServerEvent::Audit(AuditEvent {
            kind,
            subject: subject.to_string(),
            metadata,
            timestamp: Utc::now(),
        }))
    }
}
