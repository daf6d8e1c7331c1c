// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 解码线程 → 工作线程的帧交接
///
/// 解码线程推送帧, 工作线程按 `FrameStream` 拉取. 连接阶段等第一帧,
/// 视频流信息 (尺寸, 时间基, 帧率) 从第一帧得到, 只需打开一次连接.
use super::{FrameStream, Pull, StreamInfo};
use crate::error::SourceError;
use crate::frame::{Rational, VideoFrame};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 解码线程交出的一帧
#[derive(Debug)]
pub struct Decoded {
    pub frame: VideoFrame,
    /// Time base of `frame.pts`.
    pub time_base: Rational,
    /// 帧时长 (time_base 单位), 未知时为 0
    pub duration: i64,
}

impl Decoded {
    fn stream_info(&self) -> StreamInfo {
        let tb = self.time_base;
        // fps = 1 / (duration * time_base)
        let avg_frame_rate = i32::try_from(tb.num as i64 * self.duration)
            .ok()
            .map(|den| Rational::new(tb.den, den).reduced())
            .filter(Rational::is_valid);
        StreamInfo {
            width: self.frame.width,
            height: self.frame.height,
            avg_frame_rate,
            time_base: tb,
        }
    }
}

/// Pipeline result reported by the thread that waits on the decoder.
pub type Done = Result<(), String>;

pub struct Handoff {
    info: StreamInfo,
    first: Option<VideoFrame>,
    frames: Receiver<Decoded>,
    done: Receiver<Done>,
    closed: Arc<AtomicBool>,
}

impl Handoff {
    /// Waits up to `timeout` for the first decoded frame.
    ///
    /// A pipeline that finishes cleanly without producing a video frame has no
    /// video stream. On every error `closed` is raised so the decoder winds down.
    pub fn connect(
        frames: Receiver<Decoded>,
        done: Receiver<Done>,
        closed: Arc<AtomicBool>,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Self, SourceError> {
        match wait_first(&frames, &done, timeout, poll) {
            Ok(first) => Ok(Self {
                info: first.stream_info(),
                first: Some(first.frame),
                frames,
                done,
                closed,
            }),
            Err(e) => {
                closed.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

fn wait_first(
    frames: &Receiver<Decoded>,
    done: &Receiver<Done>,
    timeout: Duration,
    poll: Duration,
) -> Result<Decoded, SourceError> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(SourceError::Open(format!(
                "no video frame within {} ms",
                timeout.as_millis()
            )));
        }
        let slice = poll.min(deadline - now);

        let finished = match frames.recv_timeout(slice) {
            Ok(first) => return Ok(first),
            Err(RecvTimeoutError::Timeout) => match done.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Err("decoder exited".to_string())),
            },
            // 过滤器已释放, 等管线结果
            Err(RecvTimeoutError::Disconnected) => match done.recv_timeout(slice) {
                Ok(result) => Some(result),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Err("decoder exited".to_string())),
            },
        };

        if let Some(result) = finished {
            // 结束前可能还有一帧在队列里
            if let Ok(first) = frames.try_recv() {
                return Ok(first);
            }
            return match result {
                Ok(()) => Err(SourceError::NoVideoStream),
                Err(e) => Err(SourceError::Open(e)),
            };
        }
    }
}

impl FrameStream for Handoff {
    fn video_stream(&self) -> Option<&StreamInfo> {
        Some(&self.info)
    }

    fn next_frame(&mut self, wait: Duration) -> Result<Pull, SourceError> {
        if let Some(first) = self.first.take() {
            return Ok(Pull::Frame(first));
        }
        match self.frames.recv_timeout(wait) {
            Ok(decoded) => Ok(Pull::Frame(decoded.frame)),
            Err(RecvTimeoutError::Timeout) => Ok(Pull::Pending),
            // 过滤器已释放: 管线结束, 取结果区分正常结束和错误
            Err(RecvTimeoutError::Disconnected) => match self.done.recv_timeout(wait) {
                Ok(Ok(())) => Ok(Pull::End),
                Ok(Err(e)) => Err(SourceError::Transport(e)),
                Err(RecvTimeoutError::Timeout) => Ok(Pull::Pending),
                Err(RecvTimeoutError::Disconnected) => Ok(Pull::End),
            },
        }
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        // 下一帧到达时过滤器返回错误, FFmpeg 随之退出
        self.closed.store(true, Ordering::Relaxed);
    }
}
