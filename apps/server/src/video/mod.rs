//! RTSP capture through an ffmpeg child process.
//!
//! This module provides:
//! - Engine settings and their defaults
//! - `FfmpegCaptureEngine`, the `CaptureEngine` that decodes RTSP into JPEG frames

pub mod capture;

use std::time::Duration;

use rtspcast_core::engine::DEFAULT_FAILURE_THRESHOLD;
use rtspcast_core::service::DEFAULT_TARGET_FPS;
use rtspcast_core::RetryPolicy;
use rtspcast_protocol::DEFAULT_MAX_FRAME_SIZE;

pub use capture::FfmpegCaptureEngine;

/// Default capture configuration
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// ffmpeg `-q:v` scale, 2 (best) to 31 (worst). 5 is roughly JPEG quality 80.
pub const DEFAULT_JPEG_QUALITY: u8 = 5;

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub ffmpeg_path: String,
    pub target_fps: u32,
    pub jpeg_quality: u8,
    /// How long one attempt may take to produce its first frame
    pub connect_timeout: Duration,
    /// How long a frame read waits for a new frame before counting a failure
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub max_frame_size: usize,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            retry: RetryPolicy::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
