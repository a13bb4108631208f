//! Engine stub and app state shared by the route tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rtspcast_core::{CaptureController, CaptureEngine, CaptureResult, CaptureService, Frame};
use tokio_util::sync::CancellationToken;

use crate::managers::BroadcastPublisher;
use crate::AppState;

/// Always connects and always has a fresh frame
#[derive(Default)]
pub(crate) struct StubEngine {
    sequence: AtomicU64,
}

#[async_trait]
impl CaptureEngine for StubEngine {
    async fn start_capture(&self, _rtsp_url: &str, _cancel: CancellationToken) -> CaptureResult<()> {
        Ok(())
    }

    async fn stop_capture(&self) -> CaptureResult<()> {
        Ok(())
    }

    async fn get_current_frame(&self) -> CaptureResult<Option<Frame>> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Frame::new(
            sequence,
            Bytes::from_static(&[0xFF, 0xD8, 0x42, 0xFF, 0xD9]),
        )))
    }

    fn is_capturing(&self) -> bool {
        true
    }

    fn is_degraded(&self) -> bool {
        false
    }
}

pub(crate) fn stub_state() -> (AppState, CaptureService) {
    let hub = Arc::new(BroadcastPublisher::default());
    let service = CaptureService::new(
        "rtsp://cam/live",
        Arc::new(StubEngine::default()),
        hub.clone(),
        Default::default(),
    );
    let state = AppState {
        controller: CaptureController::new(service.clone()),
        hub,
        shutdown: CancellationToken::new(),
    };
    (state, service)
}
