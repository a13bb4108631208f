//! HTTP capture control routes under `/api/capture`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use rtspcast_core::CaptureError;
use rtspcast_protocol::{ControlAction, ControlCommand, StatusSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Invalid request body: {0}")]
    BadRequest(#[from] serde_json::Error),

    #[error("No frame available")]
    NoFrame,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Capture(CaptureError::InvalidOperation(_)) => {
                (StatusCode::CONFLICT, "INVALID_OPERATION")
            }
            ApiError::Capture(CaptureError::AlreadyRunning) => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
            ApiError::Capture(CaptureError::OperationCancelled) => (StatusCode::CONFLICT, "CANCELLED"),
            ApiError::Capture(e) if e.is_source_failure() => {
                (StatusCode::BAD_GATEWAY, "SOURCE_UNAVAILABLE")
            }
            ApiError::Capture(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NoFrame => (StatusCode::NOT_FOUND, "NO_FRAME"),
        };

        let body = json!({
            "error": code,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Optional requester details on start/stop
#[derive(Debug, Default, Deserialize)]
pub struct ControlRequest {
    pub client_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub message: String,
    pub status: StatusSnapshot,
}

#[derive(Debug, Serialize)]
pub struct FrameResponse {
    pub image: String,
    pub format: &'static str,
    pub encoding: &'static str,
    pub sequence: u64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// An empty body means no requester details
fn parse_command(action: ControlAction, body: &[u8]) -> Result<ControlCommand, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ControlRequest::default()
    } else {
        serde_json::from_slice(body)?
    };
    Ok(ControlCommand {
        action,
        client_id: request.client_id,
        metadata: request.metadata,
    })
}

/// POST /api/capture/start
pub async fn start_capture(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlResponse>, ApiError> {
    let command = parse_command(ControlAction::Start, &body)?;
    let status = state.controller.handle(command).await?;
    Ok(Json(ControlResponse {
        message: "Capture started successfully".to_string(),
        status,
    }))
}

/// POST /api/capture/stop
pub async fn stop_capture(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlResponse>, ApiError> {
    let command = parse_command(ControlAction::Stop, &body)?;
    let status = state.controller.handle(command).await?;
    Ok(Json(ControlResponse {
        message: "Capture stopped successfully".to_string(),
        status,
    }))
}

/// GET /api/capture/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.controller.service().get_status())
}

/// GET /api/capture/frame
pub async fn get_frame(State(state): State<AppState>) -> Result<Json<FrameResponse>, ApiError> {
    if !state.controller.service().get_status().is_active {
        return Err(ApiError::NoFrame);
    }
    let frame = state
        .hub
        .latest_frame()
        .filter(|frame| !frame.is_empty())
        .ok_or(ApiError::NoFrame)?;

    Ok(Json(FrameResponse {
        image: STANDARD.encode(&frame.data),
        format: "jpeg",
        encoding: "base64",
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use rtspcast_core::CaptureService;
    use tower::ServiceExt;

    use super::*;
    use crate::build_router;
    use crate::commands::stub::stub_state;

    fn app() -> (Router, CaptureService) {
        let (state, service) = stub_state();
        (build_router(state), service)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_status_starts_stopped() {
        let (app, _service) = app();
        let (status, body) = send(&app, "GET", "/api/capture/status", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");
        assert_eq!(body["is_active"], false);
        assert_eq!(body["rtsp_url"], "rtsp://cam/live");
    }

    #[tokio::test]
    async fn test_stop_when_stopped_conflicts() {
        let (app, _service) = app();
        let (status, body) = send(&app, "POST", "/api/capture/stop", Body::empty()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_OPERATION");
    }

    #[tokio::test]
    async fn test_start_frame_stop() {
        let (app, service) = app();

        let (status, body) = send(
            &app,
            "POST",
            "/api/capture/start",
            Body::from(r#"{"client_id":"browser-1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Capture started successfully");
        assert_eq!(body["status"]["status"], "running");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let (status, body) = send(&app, "GET", "/api/capture/frame", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["format"], "jpeg");
        assert_eq!(body["encoding"], "base64");
        let image = STANDARD.decode(body["image"].as_str().unwrap()).unwrap();
        assert_eq!(image, vec![0xFF, 0xD8, 0x42, 0xFF, 0xD9]);

        let (status, body) = send(&app, "POST", "/api/capture/stop", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["status"], "stopped");
        assert!(!service.is_streaming());

        let (status, _) = send(&app, "GET", "/api/capture/frame", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (app, service) = app();
        let (status, body) = send(&app, "POST", "/api/capture/start", Body::from("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
        assert_eq!(service.get_status().status, rtspcast_protocol::CaptureStatus::Stopped);
    }

    #[tokio::test]
    async fn test_healthz() {
        let (app, _service) = app();
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ApiError::Capture(CaptureError::InvalidOperation("x".into())), StatusCode::CONFLICT),
            (ApiError::Capture(CaptureError::Connection("x".into())), StatusCode::BAD_GATEWAY),
            (ApiError::Capture(CaptureError::SourceUnavailable("x".into())), StatusCode::BAD_GATEWAY),
            (ApiError::Capture(CaptureError::AlreadyRunning), StatusCode::CONFLICT),
            (ApiError::Capture(CaptureError::Internal("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::Capture(CaptureError::Io(std::io::Error::other("pipe closed"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::NoFrame, StatusCode::NOT_FOUND),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
