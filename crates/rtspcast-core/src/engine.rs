//! Capture engine boundary plus the retry and failure-counting helpers engines share.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::types::Frame;

/// Default delay between connection attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default number of consecutive read failures before an engine reports itself degraded
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Opens, reads and releases one video source.
///
/// Implementations own their source handle exclusively and keep at most one open.
#[async_trait]
pub trait CaptureEngine: Send + Sync + 'static {
    /// Open `rtsp_url`, retrying per the engine's policy until a frame is decoded,
    /// `cancel` fires, or attempts run out.
    ///
    /// Fails with `AlreadyRunning` if the engine is already capturing.
    async fn start_capture(&self, rtsp_url: &str, cancel: CancellationToken) -> CaptureResult<()>;

    /// Release the source. Calling this when nothing is open is a no-op.
    async fn stop_capture(&self) -> CaptureResult<()>;

    /// Most recent decoded frame, or `None` if no frame could be read.
    ///
    /// Read failures are counted, not raised. Once the count reaches the threshold
    /// this keeps returning `None` and `is_degraded` turns true.
    async fn get_current_frame(&self) -> CaptureResult<Option<Frame>>;

    fn is_capturing(&self) -> bool;

    fn is_degraded(&self) -> bool;
}

/// Delay schedule between connection attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Constant(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1).min(64) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// `None` retries until cancelled
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Constant(DEFAULT_RETRY_DELAY),
            max_attempts: None,
        }
    }
}

/// Run `attempt` until it succeeds, `cancel` fires, or the policy gives up.
///
/// Cancellation is honoured while an attempt is in flight and while sleeping
/// between attempts. The attempt closure receives the 1-based attempt number.
pub async fn connect_with_retry<T, F, Fut>(
    rtsp_url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> CaptureResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CaptureResult<T>>,
{
    let mut attempt_no = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(CaptureError::OperationCancelled);
        }
        attempt_no = attempt_no.saturating_add(1);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::OperationCancelled),
            result = attempt(attempt_no) => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt_no > 1 {
                    info!("Connected to {} after {} attempts", rtsp_url, attempt_no);
                }
                return Ok(value);
            }
            Err(CaptureError::OperationCancelled) => return Err(CaptureError::OperationCancelled),
            Err(e) => e,
        };

        if policy.max_attempts.is_some_and(|max| attempt_no >= max) {
            return Err(CaptureError::SourceUnavailable(format!(
                "{rtsp_url}: giving up after {attempt_no} attempts: {err}"
            )));
        }

        let delay = policy.backoff.delay(attempt_no);
        warn!(
            attempt = attempt_no,
            retry_in_ms = delay.as_millis() as u64,
            "Connection to {} failed: {}",
            rtsp_url,
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::OperationCancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Consecutive read-failure counter shared between an engine's reader and its callers
#[derive(Debug)]
pub struct FailureCounter {
    count: AtomicU32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    /// Count one failure; returns the new consecutive count
    pub fn record_failure(&self) -> u32 {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_add(1)))
        {
            Ok(prev) | Err(prev) => prev.saturating_add(1),
        }
    }

    pub fn record_success(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub fn reset(&self) {
        self.record_success();
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_degraded(&self) -> bool {
        self.count() >= self.threshold
    }
}

impl Default for FailureCounter {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}
