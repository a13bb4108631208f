//! RTSP capture via an ffmpeg child process emitting MJPEG on stdout.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rtspcast_core::engine::{connect_with_retry, CaptureEngine, FailureCounter};
use rtspcast_core::{CaptureError, CaptureResult, Frame};
use rtspcast_protocol::MjpegSplitter;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::FfmpegSettings;

/// Builds the child process for one connection attempt
pub type CommandBuilder = fn(&FfmpegSettings, &str) -> Command;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// ffmpeg arguments for reading `rtsp_url` and writing JPEG images to stdout
pub fn ffmpeg_args(settings: &FfmpegSettings, rtsp_url: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .into_iter()
        .map(String::from)
        .collect();

    if rtsp_url.starts_with("rtsp://") || rtsp_url.starts_with("rtsps://") {
        args.extend([
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            // Socket timeout in microseconds
            "-timeout".to_string(),
            settings.connect_timeout.as_micros().to_string(),
        ]);
    }

    args.extend([
        "-i".to_string(),
        rtsp_url.to_string(),
        "-an".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-c:v".to_string(),
        "mjpeg".to_string(),
        "-q:v".to_string(),
        settings.jpeg_quality.clamp(2, 31).to_string(),
        "-r".to_string(),
        settings.target_fps.max(1).to_string(),
        "-".to_string(),
    ]);
    args
}

fn ffmpeg_command(settings: &FfmpegSettings, rtsp_url: &str) -> Command {
    let mut command = Command::new(&settings.ffmpeg_path);
    command.args(ffmpeg_args(settings, rtsp_url));
    command
}

/// A live ffmpeg process and the tasks draining its pipes
struct RunningProcess {
    child: Child,
    frames: watch::Receiver<Option<Frame>>,
    reader: JoinHandle<()>,
    stderr: Option<JoinHandle<()>>,
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(stderr) = &self.stderr {
            stderr.abort();
        }
    }
}

/// `CaptureEngine` backed by one ffmpeg process at a time.
///
/// A reader task splits stdout into JPEG images and keeps only the newest one,
/// so slow consumers never back up the decoder.
pub struct FfmpegCaptureEngine {
    settings: FfmpegSettings,
    build_command: CommandBuilder,
    capturing: AtomicBool,
    failures: FailureCounter,
    process: Mutex<Option<RunningProcess>>,
    /// Sequence of the last frame handed out, 0 if none
    last_returned: AtomicU64,
}

impl FfmpegCaptureEngine {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self::with_command(settings, ffmpeg_command)
    }

    pub fn with_command(settings: FfmpegSettings, build_command: CommandBuilder) -> Self {
        let failures = FailureCounter::new(settings.failure_threshold);
        Self {
            settings,
            build_command,
            capturing: AtomicBool::new(false),
            failures,
            process: Mutex::new(None),
            last_returned: AtomicU64::new(0),
        }
    }

    /// Spawn ffmpeg and wait for its first frame
    async fn open(&self, rtsp_url: &str, attempt: u32) -> CaptureResult<RunningProcess> {
        let mut command = (self.build_command)(&self.settings, rtsp_url);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(attempt, "Spawning ffmpeg for {}", rtsp_url);
        let mut child = command.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Internal("ffmpeg stdout was not captured".into()))?;
        let (frame_tx, frame_rx) = watch::channel(None);
        let reader = tokio::spawn(read_frames(stdout, frame_tx, self.settings.max_frame_size));
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(log_stderr(stderr)));

        // Dropping this on any early return kills ffmpeg and aborts the readers
        let mut process = RunningProcess {
            child,
            frames: frame_rx,
            reader,
            stderr,
        };

        let first_frame = tokio::time::timeout(
            self.settings.connect_timeout,
            process.frames.wait_for(|frame| frame.is_some()),
        )
        .await
        .map(|received| received.map(|_| ()));

        match first_frame {
            Ok(Ok(())) => Ok(process),
            Ok(Err(_)) => {
                let status = process.child.try_wait().ok().flatten();
                Err(CaptureError::Connection(match status {
                    Some(status) => format!("ffmpeg exited with {status} before the first frame"),
                    None => "ffmpeg closed its output before the first frame".to_string(),
                }))
            }
            Err(_) => Err(CaptureError::Connection(format!(
                "no frame within {} ms",
                self.settings.connect_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl CaptureEngine for FfmpegCaptureEngine {
    async fn start_capture(&self, rtsp_url: &str, cancel: CancellationToken) -> CaptureResult<()> {
        if self
            .capturing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CaptureError::AlreadyRunning);
        }
        self.failures.reset();

        let opened = connect_with_retry(rtsp_url, &self.settings.retry, &cancel, move |attempt| {
            self.open(rtsp_url, attempt)
        })
        .await;

        match opened {
            Ok(process) => {
                if let Some(pid) = process.child.id() {
                    info!(pid, "ffmpeg capturing {}", rtsp_url);
                }
                self.last_returned.store(0, Ordering::Release);
                *self.process.lock().await = Some(process);
                Ok(())
            }
            Err(e) => {
                self.capturing.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn stop_capture(&self) -> CaptureResult<()> {
        let process = self.process.lock().await.take();
        self.capturing.store(false, Ordering::Release);

        if let Some(mut process) = process {
            if let Err(e) = process.child.kill().await {
                warn!("Failed to kill ffmpeg: {}", e);
            }
            info!("ffmpeg capture stopped");
        }
        Ok(())
    }

    async fn get_current_frame(&self) -> CaptureResult<Option<Frame>> {
        if self.failures.is_degraded() {
            return Ok(None);
        }

        // Clone the receiver so the lock is not held while waiting
        let mut frames = match self.process.lock().await.as_ref() {
            Some(process) => process.frames.clone(),
            None => return Ok(None),
        };

        let last = self.last_returned.load(Ordering::Acquire);
        let received = tokio::time::timeout(
            self.settings.read_timeout,
            frames.wait_for(|frame| frame.as_ref().is_some_and(|f| f.sequence > last)),
        )
        .await
        .map(|received| received.map(|frame| (*frame).clone()));

        match received {
            Ok(Ok(Some(frame))) => {
                self.failures.record_success();
                self.last_returned.store(frame.sequence, Ordering::Release);
                Ok(Some(frame))
            }
            Ok(Ok(None)) => Ok(None),
            Ok(Err(_)) => {
                let count = self.failures.record_failure();
                warn!(
                    consecutive = count,
                    threshold = self.failures.threshold(),
                    "ffmpeg output closed, no new frame"
                );
                Ok(None)
            }
            Err(_) => {
                let count = self.failures.record_failure();
                warn!(
                    consecutive = count,
                    threshold = self.failures.threshold(),
                    "No new frame within {} ms",
                    self.settings.read_timeout.as_millis()
                );
                Ok(None)
            }
        }
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    fn is_degraded(&self) -> bool {
        self.failures.is_degraded()
    }
}

async fn read_frames(
    mut stdout: ChildStdout,
    frame_tx: watch::Sender<Option<Frame>>,
    max_frame_size: usize,
) {
    let mut splitter = MjpegSplitter::new(max_frame_size);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut sequence = 0u64;

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for image in splitter.push(&buf[..n]) {
                    sequence += 1;
                    frame_tx.send_replace(Some(Frame::new(sequence, image)));
                }
            }
            Err(e) => {
                warn!("Error reading ffmpeg output: {}", e);
                break;
            }
        }
    }

    debug!(
        frames = sequence,
        dropped_bytes = splitter.dropped_bytes(),
        "ffmpeg output ended"
    );
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "ffmpeg", "{}", line);
    }
}
