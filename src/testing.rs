// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Test doubles for the worker's collaborators.
//!
//! - `ScriptedSource`: each `open` consumes the next scripted attempt
//! - `MemoryFactory`: an output container that logs calls instead of writing files
//! - `CollectingSink`: records every notification for later assertions

use crate::config::ConnectionTarget;
use crate::error::{RecordingError, SourceError};
use crate::events::EventSink;
use crate::frame::{Rational, VideoFrame};
use crate::recording::{ContainerFactory, EncoderSettings, OutputContainer};
use crate::source::{FrameStream, MediaSource, Pull, StreamInfo};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn frame(width: u32, height: u32, pts: Option<i64>) -> VideoFrame {
    let len = width as usize * height as usize * VideoFrame::BYTES_PER_PIXEL;
    let fill = pts.unwrap_or(0) as u8;
    VideoFrame::new(width, height, vec![fill; len], pts)
}

/// 25 fps, 90 kHz clock.
pub fn stream_info(width: u32, height: u32) -> StreamInfo {
    StreamInfo {
        width,
        height,
        avg_frame_rate: Some(Rational::new(25, 1)),
        time_base: Rational::new(1, 90_000),
    }
}

/// Polls `cond` until it holds or five seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ========== 媒体源 ==========

pub enum StreamEnd {
    Eof,
    Error(SourceError),
}

pub enum Attempt {
    Fail(SourceError),
    NoVideo,
    Play {
        info: StreamInfo,
        frames: Vec<VideoFrame>,
        end: StreamEnd,
    },
    /// Frames arrive whenever the test sends them; disconnecting ends the stream.
    Feed {
        info: StreamInfo,
        frames: Receiver<VideoFrame>,
    },
}

#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Attempt>>,
    opens: AtomicUsize,
    targets: Mutex<Vec<ConnectionTarget>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn push(&self, attempt: Attempt) {
        self.script.lock().push_back(attempt);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<ConnectionTarget> {
        self.targets.lock().clone()
    }
}

impl MediaSource for ScriptedSource {
    fn open(
        &self,
        target: &ConnectionTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn FrameStream>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push(target.clone());
        let attempt = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Attempt::Fail(SourceError::Open("connection refused".into())));
        match attempt {
            Attempt::Fail(e) => Err(e),
            Attempt::NoVideo => Ok(Box::new(ScriptedStream::NoVideo)),
            Attempt::Play { info, frames, end } => Ok(Box::new(ScriptedStream::Play {
                info,
                frames: frames.into(),
                end: Some(end),
            })),
            Attempt::Feed { info, frames } => Ok(Box::new(ScriptedStream::Feed { info, frames })),
        }
    }
}

enum ScriptedStream {
    NoVideo,
    Play {
        info: StreamInfo,
        frames: VecDeque<VideoFrame>,
        end: Option<StreamEnd>,
    },
    Feed {
        info: StreamInfo,
        frames: Receiver<VideoFrame>,
    },
}

impl FrameStream for ScriptedStream {
    fn video_stream(&self) -> Option<&StreamInfo> {
        match self {
            ScriptedStream::NoVideo => None,
            ScriptedStream::Play { info, .. } | ScriptedStream::Feed { info, .. } => Some(info),
        }
    }

    fn next_frame(&mut self, wait: Duration) -> Result<Pull, SourceError> {
        match self {
            ScriptedStream::NoVideo => Ok(Pull::End),
            ScriptedStream::Play { frames, end, .. } => {
                if let Some(f) = frames.pop_front() {
                    return Ok(Pull::Frame(f));
                }
                match end.take() {
                    Some(StreamEnd::Error(e)) => Err(e),
                    _ => Ok(Pull::End),
                }
            }
            ScriptedStream::Feed { frames, .. } => match frames.recv_timeout(wait) {
                Ok(f) => Ok(Pull::Frame(f)),
                Err(RecvTimeoutError::Timeout) => Ok(Pull::Pending),
                Err(RecvTimeoutError::Disconnected) => Ok(Pull::End),
            },
        }
    }
}

// ========== 输出容器 ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerCall {
    Created {
        path: PathBuf,
        settings: EncoderSettings,
    },
    Encoded(i64),
    Flushed,
    Closed,
}

#[derive(Default)]
struct FactoryState {
    calls: Mutex<Vec<ContainerCall>>,
    fail_create: AtomicBool,
    fail_encode: AtomicBool,
    fail_flush: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryFactory {
    state: Arc<FactoryState>,
}

impl MemoryFactory {
    pub fn fail_create(&self, fail: bool) {
        self.state.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_encode(&self, fail: bool) {
        self.state.fail_encode.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flush(&self, fail: bool) {
        self.state.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ContainerCall> {
        self.state.calls.lock().clone()
    }

    pub fn encoded_pts(&self) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ContainerCall::Encoded(pts) => Some(pts),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ContainerCall) -> bool) -> usize {
        self.state.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

impl ContainerFactory for MemoryFactory {
    fn create(
        &self,
        path: &Path,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn OutputContainer>, RecordingError> {
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(RecordingError::Open {
                path: path.to_path_buf(),
                reason: "permission denied".into(),
            });
        }
        self.state.calls.lock().push(ContainerCall::Created {
            path: path.to_path_buf(),
            settings: settings.clone(),
        });
        Ok(Box::new(MemoryContainer {
            state: self.state.clone(),
        }))
    }
}

struct MemoryContainer {
    state: Arc<FactoryState>,
}

impl OutputContainer for MemoryContainer {
    fn encode(&mut self, _frame: &VideoFrame, pts: i64) -> Result<(), RecordingError> {
        if self.state.fail_encode.load(Ordering::SeqCst) {
            return Err(RecordingError::Encode("codec rejected frame".into()));
        }
        self.state.calls.lock().push(ContainerCall::Encoded(pts));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecordingError> {
        if self.state.fail_flush.load(Ordering::SeqCst) {
            return Err(RecordingError::Flush("broken pipe".into()));
        }
        self.state.calls.lock().push(ContainerCall::Flushed);
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecordingError> {
        self.state.calls.lock().push(ContainerCall::Closed);
        Ok(())
    }
}

// ========== 事件 ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Frame { width: u32, height: u32, pts: Option<i64> },
    Status(String),
    Recording(bool),
    Stopped,
}

#[derive(Default)]
pub struct CollectingSink {
    seen: Mutex<Vec<Seen>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Status(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn recording_events(&self) -> Vec<bool> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Recording(on) => Some(on),
                _ => None,
            })
            .collect()
    }

    pub fn frame_pts(&self) -> Vec<Option<i64>> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Frame { pts, .. } => Some(pts),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Seen) -> bool) -> usize {
        self.seen.lock().iter().filter(|s| pred(s)).count()
    }
}

impl EventSink for CollectingSink {
    fn frame_ready(&self, frame: Arc<VideoFrame>) {
        self.seen.lock().push(Seen::Frame {
            width: frame.width,
            height: frame.height,
            pts: frame.pts,
        });
    }

    fn status(&self, text: &str) {
        self.seen.lock().push(Seen::Status(text.to_string()));
    }

    fn recording_changed(&self, recording: bool) {
        self.seen.lock().push(Seen::Recording(recording));
    }

    fn stopped(&self) {
        self.seen.lock().push(Seen::Stopped);
    }
}
