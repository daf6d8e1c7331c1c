// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 媒体源接口 (Media Source capability)
///
/// 工作线程只依赖这里的 trait:
/// 1. MediaSource: 按连接参数打开流
/// 2. FrameStream: 报告视频流信息, 逐帧拉取已解码的 RGB24 帧
///
/// `handoff` bridges a push-style decoder thread to `FrameStream`.
/// The FFmpeg implementation lives behind the `ffmpeg` feature.
use crate::config::ConnectionTarget;
use crate::error::SourceError;
use crate::frame::{Rational, VideoFrame};
use std::time::Duration;

#[cfg(feature = "ffmpeg")]
mod decode_filter;
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
mod handoff;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;

/// 视频流信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// 平均帧率, 源不报告时为 None
    pub avg_frame_rate: Option<Rational>,
    /// Time base of the frames' `pts`.
    pub time_base: Rational,
}

impl StreamInfo {
    pub fn frame_rate(&self) -> Option<Rational> {
        self.avg_frame_rate.filter(Rational::is_valid)
    }
}

/// 一次拉帧的结果
#[derive(Debug)]
pub enum Pull {
    Frame(VideoFrame),
    /// Nothing arrived within the wait slice; the stream is still open.
    Pending,
    /// 流结束
    End,
}

/// An opened stream. Dropping it closes the connection.
pub trait FrameStream: Send {
    /// First video stream of the source, `None` if the source has none.
    fn video_stream(&self) -> Option<&StreamInfo>;

    /// Waits up to `wait` for the next decoded frame.
    fn next_frame(&mut self, wait: Duration) -> Result<Pull, SourceError>;
}

pub trait MediaSource: Send + Sync {
    /// Opens `target`; the connect phase should give up after `timeout`.
    fn open(
        &self,
        target: &ConnectionTarget,
        timeout: Duration,
    ) -> Result<Box<dyn FrameStream>, SourceError>;
}
