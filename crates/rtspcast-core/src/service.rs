//! Capture orchestration: drives the session state machine, sequences engine
//! start/stop against it and owns the background streaming supervisor.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use rtspcast_protocol::StatusSnapshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::CaptureEngine;
use crate::error::{CaptureError, CaptureResult};
use crate::publisher::Publisher;
use crate::session::CaptureSession;

pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Streaming loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub target_fps: u32,
}

impl StreamSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

/// Cancellation and supervisor of the current (or last) run
struct RunHandle {
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

struct ServiceState {
    session: CaptureSession,
    run: Option<RunHandle>,
}

struct Shared {
    engine: Arc<dyn CaptureEngine>,
    publisher: Arc<dyn Publisher>,
    settings: StreamSettings,
    /// Guard checks and transitions happen under one short-held lock
    state: Mutex<ServiceState>,
    /// Serializes engine start against engine stop
    control: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit_status(&self, snapshot: &StatusSnapshot) {
        if let Err(e) = self.publisher.emit_status(snapshot).await {
            warn!("Failed to emit capture status: {}", e);
        }
    }

    /// Set the session to Error unless the run was cancelled (a stop owns the
    /// remaining transitions then). Returns the snapshot to emit, if any.
    fn fail_run(&self, cancel: &CancellationToken, message: String) -> Option<StatusSnapshot> {
        let mut state = self.lock_state();
        if cancel.is_cancelled() || !state.session.is_active() {
            return None;
        }
        state.session.mark_error(message);
        Some(state.session.snapshot())
    }
}

/// Owns the single capture session of this process.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct CaptureService {
    inner: Arc<Shared>,
}

impl CaptureService {
    pub fn new(
        rtsp_url: impl Into<String>,
        engine: Arc<dyn CaptureEngine>,
        publisher: Arc<dyn Publisher>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                engine,
                publisher,
                settings,
                state: Mutex::new(ServiceState {
                    session: CaptureSession::new(rtsp_url),
                    run: None,
                }),
                control: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.inner.publisher
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.inner.lock_state().session.snapshot()
    }

    /// Push the current snapshot to the publisher and return it
    pub async fn publish_status(&self) -> StatusSnapshot {
        let snapshot = self.get_status();
        self.inner.emit_status(&snapshot).await;
        snapshot
    }

    /// True while a streaming supervisor task is alive
    pub fn is_streaming(&self) -> bool {
        self.inner
            .lock_state()
            .run
            .as_ref()
            .and_then(|run| run.supervisor.as_ref())
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start capturing. Returns once the engine is producing frames and the
    /// streaming supervisor is running.
    ///
    /// The transition runs on its own task: dropping the returned future does
    /// not interrupt it.
    pub async fn start_capture(&self) -> CaptureResult<StatusSnapshot> {
        let service = self.clone();
        run_to_completion(async move { service.start_transition().await }).await
    }

    /// Stop capturing. Returns after the supervisor has exited and the engine
    /// has released the source.
    ///
    /// Like `start_capture`, the transition completes even if the caller goes away.
    pub async fn stop_capture(&self) -> CaptureResult<StatusSnapshot> {
        let service = self.clone();
        run_to_completion(async move { service.stop_transition().await }).await
    }

    async fn start_transition(&self) -> CaptureResult<StatusSnapshot> {
        let shared = &self.inner;

        let (cancel, rtsp_url, previous, snapshot) = {
            let mut state = shared.lock_state();
            state.session.start()?;
            let cancel = CancellationToken::new();
            let previous = state.run.replace(RunHandle {
                cancel: cancel.clone(),
                supervisor: None,
            });
            if let Some(previous) = &previous {
                previous.cancel.cancel();
            }
            (
                cancel,
                state.session.rtsp_url().to_string(),
                previous,
                state.session.snapshot(),
            )
        };
        shared.emit_status(&snapshot).await;
        info!("Starting capture of {}", rtsp_url);

        let _control = shared.control.lock().await;

        // A supervisor from a run that ended in error may still be winding down
        if let Some(handle) = previous.and_then(|run| run.supervisor) {
            if let Err(e) = handle.await {
                warn!("Previous streaming supervisor ended abnormally: {}", e);
            }
        }

        if cancel.is_cancelled() {
            return Err(CaptureError::OperationCancelled);
        }

        if let Err(e) = shared.engine.start_capture(&rtsp_url, cancel.clone()).await {
            return match shared.fail_run(&cancel, e.to_string()) {
                Some(snapshot) => {
                    error!("Failed to start capture of {}: {}", rtsp_url, e);
                    shared.emit_status(&snapshot).await;
                    Err(e)
                }
                None => {
                    info!("Capture start of {} cancelled", rtsp_url);
                    Err(CaptureError::OperationCancelled)
                }
            };
        }

        let snapshot = {
            let mut state = shared.lock_state();
            if cancel.is_cancelled() {
                None
            } else {
                state.session.mark_running()?;
                let supervisor = tokio::spawn(supervise(shared.clone(), cancel.clone()));
                if let Some(run) = state.run.as_mut() {
                    run.supervisor = Some(supervisor);
                }
                Some(state.session.snapshot())
            }
        };

        match snapshot {
            Some(snapshot) => {
                info!("Capture running: {}", rtsp_url);
                shared.emit_status(&snapshot).await;
                Ok(snapshot)
            }
            // The stop request releases the engine once we drop the control lock
            None => Err(CaptureError::OperationCancelled),
        }
    }

    async fn stop_transition(&self) -> CaptureResult<StatusSnapshot> {
        let shared = &self.inner;

        let (run, snapshot) = {
            let mut state = shared.lock_state();
            state.session.stop()?;
            let run = state.run.take();
            if let Some(run) = &run {
                run.cancel.cancel();
            }
            (run, state.session.snapshot())
        };
        shared.emit_status(&snapshot).await;
        info!("Stopping capture of {}", snapshot.rtsp_url);

        let result = self.release(run).await;

        let snapshot = {
            let mut state = shared.lock_state();
            match &result {
                Ok(()) => state.session.mark_stopped()?,
                Err(e) => state.session.mark_error(e.to_string()),
            }
            state.session.snapshot()
        };
        shared.emit_status(&snapshot).await;

        match result {
            Ok(()) => {
                info!("Capture stopped");
                Ok(snapshot)
            }
            Err(e) => {
                error!("Failed to stop capture: {}", e);
                Err(e)
            }
        }
    }

    /// Stop any active capture and reap a leftover supervisor
    pub async fn shutdown(&self) {
        match self.stop_capture().await {
            Ok(_) => info!("Capture stopped for shutdown"),
            Err(CaptureError::InvalidOperation(_)) => {}
            Err(e) => warn!("Stopping capture during shutdown failed: {}", e),
        }

        let leftover = self.inner.lock_state().run.take();
        if let Some(run) = leftover {
            run.cancel.cancel();
            if let Some(handle) = run.supervisor {
                if let Err(e) = handle.await {
                    warn!("Streaming supervisor ended abnormally: {}", e);
                }
            }
        }
    }

    async fn release(&self, run: Option<RunHandle>) -> CaptureResult<()> {
        let _control = self.inner.control.lock().await;

        if let Some(handle) = run.and_then(|run| run.supervisor) {
            handle
                .await
                .map_err(|e| CaptureError::Internal(format!("streaming supervisor failed: {e}")))?;
        }

        self.inner.engine.stop_capture().await
    }
}

async fn run_to_completion<F>(transition: F) -> CaptureResult<StatusSnapshot>
where
    F: Future<Output = CaptureResult<StatusSnapshot>> + Send + 'static,
{
    match tokio::spawn(transition).await {
        Ok(result) => result,
        Err(e) => Err(CaptureError::Internal(format!("capture transition failed: {e}"))),
    }
}

async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.settings.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut published = 0u64;

    info!("Streaming supervisor started at {} fps", shared.settings.target_fps);

    let failure = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            _ = ticker.tick() => {}
        }

        if !shared.lock_state().session.is_active() {
            break None;
        }

        let step = AssertUnwindSafe(stream_once(&shared)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            outcome = step => outcome,
        };

        match outcome {
            Ok(Ok(true)) => published += 1,
            Ok(Ok(false)) => {}
            Ok(Err(e)) => break Some(e.to_string()),
            Err(panic) => break Some(format!("streaming loop panicked: {}", panic_message(&*panic))),
        }
    };

    if let Some(message) = failure {
        error!("Capture streaming failed: {}", message);
        if let Err(e) = shared.engine.stop_capture().await {
            warn!("Failed to release capture engine: {}", e);
        }
        if let Some(snapshot) = shared.fail_run(&cancel, message) {
            shared.emit_status(&snapshot).await;
        }
    }

    info!(frames = published, "Streaming supervisor exited");
}

/// One tick: read a frame and hand it to the publisher. Returns whether a frame was sent.
async fn stream_once(shared: &Shared) -> CaptureResult<bool> {
    match shared.engine.get_current_frame().await? {
        Some(frame) => {
            if let Err(e) = shared.publisher.send_frame(&frame).await {
                warn!(sequence = frame.sequence, "Failed to publish frame: {}", e);
            }
            Ok(true)
        }
        None if shared.engine.is_degraded() => Err(CaptureError::SourceUnavailable(
            "too many consecutive frame read failures".into(),
        )),
        None => {
            debug!("No frame available");
            Ok(false)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
