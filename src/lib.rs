// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多路 RTSP 拉流 + 录制
//!
//! Each camera gets a [`StreamWorker`]: a background thread that connects,
//! decodes to RGB24, hands frames to an [`EventSink`] and, on request, records
//! them to a Matroska file with timestamps rebased to zero. Lost connections
//! are retried until the worker is stopped.
//!
//! The FFmpeg backends ([`source::FfmpegSource`], [`recording::FfmpegContainerFactory`])
//! are compiled with the `ffmpeg` feature.
pub mod config; // 连接 / 工作线程 / 录制参数
pub mod error; // 错误类型
pub mod events; // 工作线程通知
pub mod frame; // RGB24 帧
pub mod recording; // 录制会话与输出容器
pub mod source; // 媒体源接口
pub mod worker; // 拉流工作线程

#[cfg(test)]
mod testing;

pub use crate::config::{
    CameraConfig, ConnectionTarget, PanelSet, RecordingOptions, Transport, WorkerConfig,
};
pub use crate::error::{ConfigError, RecordingError, SnapshotError, SourceError};
pub use crate::events::{ChannelSink, EventSink, WorkerEvent};
pub use crate::frame::{Rational, VideoFrame};
pub use crate::recording::{ContainerFactory, OutputContainer};
pub use crate::source::{FrameStream, MediaSource, Pull, StreamInfo};
pub use crate::worker::{StreamWorker, WorkerState};

/// 录制 / 截图文件名用的时间串, 例如 `20240611-142501`
pub fn gen_time_string(delimiter: &str) -> String {
    let now = chrono::Local::now();
    now.format(&format!("%Y%m%d{delimiter}%H%M%S")).to_string()
}
