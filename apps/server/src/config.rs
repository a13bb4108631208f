//! Process configuration from `RTSPCAST_*` environment variables.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rtspcast_core::{Backoff, RetryPolicy, StreamSettings};
use tracing::warn;

use crate::managers::event_hub::DEFAULT_EVENT_BUFFER;
use crate::video::FfmpegSettings;

pub const DEFAULT_RTSP_URL: &str = "rtsp://210.99.70.120:1935/live/cctv003.stream";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub rtsp_url: String,
    pub bind_addr: SocketAddr,
    pub stream: StreamSettings,
    pub ffmpeg: FfmpegSettings,
    pub event_buffer: usize,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup. Unparseable values fall back to
    /// their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let rtsp_url = lookup("RTSPCAST_RTSP_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RTSP_URL.to_string());

        let host = parse_var(&lookup, "RTSPCAST_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = parse_var(&lookup, "RTSPCAST_PORT", DEFAULT_PORT);

        let defaults = FfmpegSettings::default();
        let target_fps = parse_var(&lookup, "RTSPCAST_TARGET_FPS", defaults.target_fps).max(1);
        let retry_delay = millis_var(&lookup, "RTSPCAST_RETRY_DELAY_MS", retry_delay(&defaults.retry));

        let backoff = match lookup("RTSPCAST_BACKOFF").as_deref().map(str::trim) {
            None | Some("") | Some("constant") => Backoff::Constant(retry_delay),
            Some("exponential") => Backoff::Exponential {
                initial: retry_delay,
                max: millis_var(&lookup, "RTSPCAST_MAX_RETRY_DELAY_MS", DEFAULT_MAX_RETRY_DELAY),
                multiplier: 2.0,
            },
            Some(other) => {
                warn!("Unknown RTSPCAST_BACKOFF '{}', using constant", other);
                Backoff::Constant(retry_delay)
            }
        };

        let max_attempts = match lookup("RTSPCAST_MAX_CONNECT_ATTEMPTS") {
            None => None,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => {
                    warn!("Invalid RTSPCAST_MAX_CONNECT_ATTEMPTS '{}', retrying forever", raw);
                    None
                }
            },
        };

        let ffmpeg = FfmpegSettings {
            ffmpeg_path: lookup("RTSPCAST_FFMPEG_PATH")
                .filter(|path| !path.trim().is_empty())
                .unwrap_or(defaults.ffmpeg_path),
            target_fps,
            jpeg_quality: parse_var(&lookup, "RTSPCAST_JPEG_QUALITY", defaults.jpeg_quality),
            connect_timeout: millis_var(&lookup, "RTSPCAST_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            read_timeout: millis_var(&lookup, "RTSPCAST_READ_TIMEOUT_MS", defaults.read_timeout),
            retry: RetryPolicy {
                backoff,
                max_attempts,
            },
            failure_threshold: parse_var(&lookup, "RTSPCAST_FAILURE_THRESHOLD", defaults.failure_threshold)
                .max(1),
            max_frame_size: defaults.max_frame_size,
        };

        Self {
            rtsp_url,
            bind_addr: SocketAddr::new(host, port),
            stream: StreamSettings { target_fps },
            ffmpeg,
            event_buffer: parse_var(&lookup, "RTSPCAST_EVENT_BUFFER", DEFAULT_EVENT_BUFFER).max(1),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {} '{}', using default {}", key, raw, default);
            default
        }),
    }
}

fn millis_var(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let millis = parse_var(lookup, key, default.as_millis() as u64);
    Duration::from_millis(millis)
}

fn retry_delay(policy: &RetryPolicy) -> Duration {
    match policy.backoff {
        Backoff::Constant(delay) => delay,
        Backoff::Exponential { initial, .. } => initial,
    }
}
