// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 拉流工作线程 (Stream Worker)
///
/// 每路摄像头一个独立线程:
/// 1. 连接: 打开媒体源, 找到视频流
/// 2. 播放: 逐帧拉取 → 录制 (若开启) → 缓存最新帧 → 通知显示
/// 3. 断流/出错: 等待后重连, 直到 stop()
///
/// 录制的请求和资源保存在同一把锁里的 `RecordingSlot` 中, 控制线程随时可以
/// 开始/停止录制; 锁只在检查状态和打开/写入/关闭输出时持有, 从不跨越拉帧.
use crate::config::{ConnectionTarget, RecordingOptions, WorkerConfig};
use crate::error::{RecordingError, SnapshotError, SourceError};
use crate::events::EventSink;
use crate::frame::VideoFrame;
use crate::recording::{ContainerFactory, RecordingSession, RecordingSlot};
use crate::source::{FrameStream, MediaSource, Pull, StreamInfo};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

pub const STATUS_CONNECTING: &str = "Connecting…";
pub const STATUS_PLAYING: &str = "Playing";

/// 工作线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Connecting = 1,
    Playing = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Connecting,
            2 => WorkerState::Playing,
            3 => WorkerState::Stopped,
            _ => WorkerState::Idle,
        }
    }
}

/// State shared between the controller and the worker thread.
struct Shared {
    label: String,
    sink: Arc<dyn EventSink>,
    factory: Arc<dyn ContainerFactory>,
    recording: Mutex<RecordingSlot>,
    last_frame: Mutex<Option<Arc<VideoFrame>>>,
    state: AtomicU8,
    /// 当前运行的代数; 超时未退出的旧线程不再改动共享状态
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn status(&self, text: &str) {
        tracing::info!(camera = %self.label, "{}", text);
        self.sink.status(text);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// 录制一帧: 必要时先创建输出. 失败只影响录制, 不影响播放.
    fn record_frame(&self, frame: &VideoFrame, info: &StreamInfo, options: &RecordingOptions) {
        let mut slot = self.recording.lock();

        if let RecordingSlot::Requested { path } = &*slot {
            match RecordingSession::materialize(
                self.factory.as_ref(),
                path,
                frame,
                info,
                options,
            ) {
                Ok(session) => {
                    tracing::info!(
                        camera = %self.label,
                        path = %session.path().display(),
                        "recording started"
                    );
                    *slot = RecordingSlot::Active(session);
                }
                Err(e) => {
                    tracing::warn!(camera = %self.label, error = %e, "recording init failed");
                    *slot = RecordingSlot::Idle;
                    // 持锁通知, 保证与控制线程的 start/stop 通知顺序一致
                    self.sink.status(&format!("Recording init failed: {e}"));
                    self.sink.recording_changed(false);
                    return;
                }
            }
        }

        if let RecordingSlot::Active(session) = &mut *slot {
            if let Err(e) = session.write(frame) {
                tracing::debug!(camera = %self.label, error = %e, "recording write failed");
                self.sink.status(&format!("Recording error: {e}"));
            }
        }
    }

    /// 替换整块最新帧 (读者不会看到半帧), 然后通知显示
    fn publish(&self, frame: VideoFrame) {
        let frame = Arc::new(frame);
        *self.last_frame.lock() = Some(frame.clone());
        self.sink.frame_ready(frame);
    }

    fn start_recording(&self, path: PathBuf) -> Result<(), RecordingError> {
        let mut slot = self.recording.lock();
        slot.request(path.clone())?;
        tracing::info!(camera = %self.label, path = %path.display(), "recording requested");
        self.sink.recording_changed(true);
        Ok(())
    }

    /// Clears the slot; an open session is flushed and closed under the lock.
    fn stop_recording(&self) -> Result<(), RecordingError> {
        let mut slot = self.recording.lock();
        let result = match slot.take() {
            RecordingSlot::Idle => return Ok(()),
            RecordingSlot::Requested { .. } => Ok(()),
            RecordingSlot::Active(session) => session.finish().map(|_| ()),
        };
        self.sink.recording_changed(false);
        result
    }
}

/// 单次运行的取消令牌
#[derive(Clone)]
struct RunToken {
    cancel: Arc<AtomicBool>,
    generation: u64,
}

impl RunToken {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

enum Outcome {
    Cancelled,
    Ended,
    Failed(SourceError),
}

struct Runner {
    shared: Arc<Shared>,
    source: Arc<dyn MediaSource>,
    config: WorkerConfig,
    options: RecordingOptions,
    target: ConnectionTarget,
    token: RunToken,
    /// Dropped when the thread exits; `stop()` waits on the paired receiver.
    _exit: Sender<()>,
}

impl Runner {
    fn run(self) {
        let label = self.shared.label.clone();
        tracing::info!(camera = %label, url = %self.target.redacted_url(), transport = %self.target.transport, "🎬 worker started");

        while !self.token.cancelled() {
            self.shared.set_state(WorkerState::Connecting);
            self.shared.status(STATUS_CONNECTING);

            let outcome = match self.source.open(&self.target, self.config.connect_timeout()) {
                Ok(stream) => self.play(stream),
                Err(e) => Outcome::Failed(e),
            };

            if self.token.cancelled() {
                break;
            }

            match outcome {
                Outcome::Cancelled => break,
                Outcome::Failed(e) if e.is_structural() => {
                    tracing::error!(camera = %label, "{}", e);
                    self.shared.status(&e.to_string());
                    break;
                }
                Outcome::Failed(e) => {
                    tracing::warn!(camera = %label, error = %e, "stream failed");
                    self.shared.status(&format!(
                        "{}; retrying in {}…",
                        e,
                        self.config.backoff_label()
                    ));
                }
                Outcome::Ended => {
                    self.shared.status(&format!(
                        "Stream ended, reconnecting in {}…",
                        self.config.backoff_label()
                    ));
                }
            }

            if !self.backoff() {
                break;
            }
        }

        self.finish();
    }

    fn play(&self, mut stream: Box<dyn FrameStream>) -> Outcome {
        let Some(info) = stream.video_stream().cloned() else {
            return Outcome::Failed(SourceError::NoVideoStream);
        };

        self.shared.status(STATUS_PLAYING);
        self.shared.set_state(WorkerState::Playing);

        let mut frames: u64 = 0;
        loop {
            if self.token.cancelled() {
                return Outcome::Cancelled;
            }
            match stream.next_frame(self.config.poll_interval()) {
                Ok(Pull::Pending) => continue,
                Ok(Pull::End) => {
                    tracing::debug!(camera = %self.shared.label, frames, "stream ended");
                    return Outcome::Ended;
                }
                Err(e) => return Outcome::Failed(e),
                Ok(Pull::Frame(frame)) => {
                    if self.token.cancelled() {
                        return Outcome::Cancelled;
                    }
                    frames += 1;
                    self.shared.record_frame(&frame, &info, &self.options);
                    self.shared.publish(frame);
                }
            }
        }
    }

    /// 重连等待, 按 poll_interval 切片检查取消. 被取消返回 false.
    fn backoff(&self) -> bool {
        let deadline = Instant::now() + self.config.backoff();
        loop {
            if self.token.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(self.config.poll_interval().min(deadline - now));
        }
    }

    fn finish(&self) {
        if !self.shared.is_current(self.token.generation) {
            tracing::debug!(camera = %self.shared.label, "stale worker exiting");
            return;
        }
        // 退出前关闭录制 (flush + close), 错误只记录
        if let Err(e) = self.shared.stop_recording() {
            tracing::warn!(camera = %self.shared.label, error = %e, "closing recording on exit failed");
        }
        self.shared.set_state(WorkerState::Stopped);
        tracing::info!(camera = %self.shared.label, "worker stopped");
        self.shared.sink.stopped();
    }
}

struct RunHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    exited: Receiver<()>,
}

/// 控制端句柄: 启停工作线程, 启停录制, 截图
///
/// All methods take `&self` and may be called from any thread.
pub struct StreamWorker {
    shared: Arc<Shared>,
    source: Arc<dyn MediaSource>,
    config: WorkerConfig,
    options: RecordingOptions,
    run: Mutex<Option<RunHandle>>,
}

impl StreamWorker {
    pub fn new(
        label: impl Into<String>,
        source: Arc<dyn MediaSource>,
        factory: Arc<dyn ContainerFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                sink,
                factory,
                recording: Mutex::new(RecordingSlot::Idle),
                last_frame: Mutex::new(None),
                state: AtomicU8::new(WorkerState::Idle as u8),
                generation: AtomicU64::new(0),
            }),
            source,
            config: WorkerConfig::default(),
            options: RecordingOptions::default(),
            run: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Encoder settings for recordings opened by the next `start`.
    pub fn with_recording_options(mut self, options: RecordingOptions) -> Self {
        self.options = options;
        self
    }

    /// Stops any previous run, then connects to `target` on a new thread.
    pub fn start(&self, target: ConnectionTarget) -> std::io::Result<()> {
        let mut run = self.run.lock();
        if let Some(previous) = run.take() {
            self.stop_run(previous);
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = Arc::new(AtomicBool::new(false));
        let (exit_tx, exited) = bounded::<()>(0);
        let runner = Runner {
            shared: self.shared.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
            options: self.options.clone(),
            target,
            token: RunToken {
                cancel: cancel.clone(),
                generation,
            },
            _exit: exit_tx,
        };

        self.shared.set_state(WorkerState::Connecting);
        let thread = std::thread::Builder::new()
            .name(format!("stream-{}", self.shared.label))
            .spawn(move || runner.run())?;

        *run = Some(RunHandle {
            cancel,
            thread,
            exited,
        });
        Ok(())
    }

    /// Signals the worker to stop and waits up to the configured stop timeout.
    /// A thread stuck inside a decode call is left to finish on its own.
    pub fn stop(&self) {
        let mut run = self.run.lock();
        if let Some(handle) = run.take() {
            self.stop_run(handle);
        }
    }

    fn stop_run(&self, handle: RunHandle) {
        handle.cancel.store(true, Ordering::SeqCst);
        match handle.exited.recv_timeout(self.config.stop_timeout()) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if handle.thread.join().is_err() {
                    tracing::error!(camera = %self.shared.label, "worker thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    camera = %self.shared.label,
                    timeout_ms = self.config.stop_timeout_ms,
                    "worker did not exit in time, detaching"
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|h| !h.thread.is_finished())
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Requests a recording to `path`; the file is created on the next frame.
    pub fn start_recording(&self, path: impl Into<PathBuf>) -> Result<(), RecordingError> {
        self.shared.start_recording(path.into())
    }

    /// Flushes and closes the current recording. No-op when not recording.
    pub fn stop_recording(&self) -> Result<(), RecordingError> {
        self.shared.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.lock().is_recording()
    }

    pub fn last_frame(&self) -> Option<Arc<VideoFrame>> {
        self.shared.last_frame.lock().clone()
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let frame = self.last_frame().ok_or(SnapshotError::NoFrame)?;
        frame.save(path)?;
        tracing::info!(camera = %self.shared.label, path = %path.display(), "snapshot saved");
        Ok(())
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
