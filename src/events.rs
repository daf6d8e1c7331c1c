// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 工作线程通知
/// Notifications from a stream worker to its controller
use crate::frame::VideoFrame;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::Arc;

/// Receives worker notifications on the worker's thread (or, for recording
/// changes caused by a controller call, on the caller's thread).
///
/// Implementations must not block and must not call back into the worker;
/// `status` and `recording_changed` may run while the recording lock is held.
pub trait EventSink: Send + Sync {
    /// 新的解码帧 (按解码顺序, 每帧一次)
    fn frame_ready(&self, frame: Arc<VideoFrame>);
    fn status(&self, text: &str);
    fn recording_changed(&self, recording: bool);
    /// 工作线程退出
    fn stopped(&self);
}

/// 控制类事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Status(String),
    Recording(bool),
    Stopped,
}

/// Channel-backed sink: control events on an unbounded channel, frames on a
/// small bounded one where the oldest frame is discarded when the consumer
/// falls behind.
pub struct ChannelSink {
    frames: Sender<Arc<VideoFrame>>,
    stale: Receiver<Arc<VideoFrame>>,
    events: Sender<WorkerEvent>,
}

impl ChannelSink {
    pub fn new(frame_capacity: usize) -> (Self, Receiver<Arc<VideoFrame>>, Receiver<WorkerEvent>) {
        let (frames, frames_rx) = bounded(frame_capacity.max(1));
        let (events, events_rx) = unbounded();
        let sink = Self {
            frames,
            stale: frames_rx.clone(),
            events,
        };
        (sink, frames_rx, events_rx)
    }
}

impl EventSink for ChannelSink {
    fn frame_ready(&self, frame: Arc<VideoFrame>) {
        let mut frame = frame;
        // 只保留最新帧
        loop {
            match self.frames.try_send(frame) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(f)) => {
                    let _ = self.stale.try_recv();
                    frame = f;
                }
            }
        }
    }

    fn status(&self, text: &str) {
        let _ = self.events.send(WorkerEvent::Status(text.to_string()));
    }

    fn recording_changed(&self, recording: bool) {
        let _ = self.events.send(WorkerEvent::Recording(recording));
    }

    fn stopped(&self) {
        let _ = self.events.send(WorkerEvent::Stopped);
    }
}
