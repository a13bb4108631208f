//! Scripted engine and recording publisher for service tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rtspcast_protocol::{AuditKind, CaptureStatus, StatusSnapshot};
use tokio_util::sync::CancellationToken;

use crate::engine::{CaptureEngine, FailureCounter};
use crate::error::{CaptureError, CaptureResult, PublishError};
use crate::publisher::Publisher;
use crate::types::Frame;

pub(crate) enum StartStep {
    Fail(&'static str),
    HangUntilCancelled,
}

pub(crate) enum ReadStep {
    Missing,
    Fail(&'static str),
    Panic,
}

/// Starts instantly and yields a fresh frame per read unless scripted otherwise
pub(crate) struct MockEngine {
    capturing: AtomicBool,
    starts: Mutex<VecDeque<StartStep>>,
    reads: Mutex<VecDeque<ReadStep>>,
    failures: FailureCounter,
    sequence: AtomicU64,
    stop_delay: Mutex<Duration>,
    pub start_calls: AtomicU32,
    pub stop_calls: AtomicU32,
    pub read_calls: AtomicU32,
}

impl MockEngine {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            capturing: AtomicBool::new(false),
            starts: Mutex::new(VecDeque::new()),
            reads: Mutex::new(VecDeque::new()),
            failures: FailureCounter::new(failure_threshold),
            sequence: AtomicU64::new(0),
            stop_delay: Mutex::new(Duration::ZERO),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            read_calls: AtomicU32::new(0),
        }
    }

    pub fn script_start(&self, step: StartStep) {
        self.starts.lock().unwrap().push_back(step);
    }

    /// Make every stop take `delay` before the source is released
    pub fn slow_stop(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    pub fn script_reads(&self, steps: impl IntoIterator<Item = ReadStep>) {
        self.reads.lock().unwrap().extend(steps);
    }
}

#[async_trait]
impl CaptureEngine for MockEngine {
    async fn start_capture(&self, _rtsp_url: &str, cancel: CancellationToken) -> CaptureResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .capturing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CaptureError::AlreadyRunning);
        }

        let step = self.starts.lock().unwrap().pop_front();
        let result = match step {
            None => Ok(()),
            Some(StartStep::Fail(message)) => Err(CaptureError::Connection(message.into())),
            Some(StartStep::HangUntilCancelled) => {
                cancel.cancelled().await;
                Err(CaptureError::OperationCancelled)
            }
        };

        if result.is_err() {
            self.capturing.store(false, Ordering::Release);
        } else {
            self.failures.reset();
        }
        result
    }

    async fn stop_capture(&self) -> CaptureResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.capturing.store(false, Ordering::Release);
        Ok(())
    }

    async fn get_current_frame(&self) -> CaptureResult<Option<Frame>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.is_degraded() {
            return Ok(None);
        }

        let step = self.reads.lock().unwrap().pop_front();
        match step {
            None => {
                self.failures.record_success();
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Frame::new(
                    sequence,
                    Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
                )))
            }
            Some(ReadStep::Missing) => {
                self.failures.record_failure();
                Ok(None)
            }
            Some(ReadStep::Fail(message)) => Err(CaptureError::Connection(message.into())),
            Some(ReadStep::Panic) => panic!("frame decoder exploded"),
        }
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    fn is_degraded(&self) -> bool {
        self.failures.is_degraded()
    }
}

/// Records everything it is handed
#[derive(Default)]
pub(crate) struct MockPublisher {
    frames: Mutex<Vec<u64>>,
    statuses: Mutex<Vec<StatusSnapshot>>,
    events: Mutex<Vec<(AuditKind, String, serde_json::Value)>>,
    failing_frames: AtomicU32,
}

impl MockPublisher {
    /// Rejects the first `count` frames
    pub fn failing_frames(count: u32) -> Self {
        let publisher = Self::default();
        publisher.failing_frames.store(count, Ordering::SeqCst);
        publisher
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn statuses(&self) -> Vec<CaptureStatus> {
        self.statuses.lock().unwrap().iter().map(|s| s.status).collect()
    }

    pub fn events(&self) -> Vec<(AuditKind, String, serde_json::Value)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn send_frame(&self, frame: &Frame) -> Result<(), PublishError> {
        let should_fail = self
            .failing_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(PublishError::Transport("subscriber gone".into()));
        }
        self.frames.lock().unwrap().push(frame.sequence);
        Ok(())
    }

    async fn emit_status(&self, snapshot: &StatusSnapshot) -> Result<(), PublishError> {
        self.statuses.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn log_event(
        &self,
        kind: AuditKind,
        subject: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PublishError> {
        self.events
            .lock()
            .unwrap()
            .push((kind, subject.to_string(), metadata));
        Ok(())
    }
}
