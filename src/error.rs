// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 错误类型
/// Error types for sources, recordings, snapshots and configuration
use std::path::PathBuf;
use thiserror::Error;

/// 媒体源错误 (拉流 / 解码)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// 打开失败 (连接超时, 拒绝连接, 认证失败...)
    #[error("Open failed: {0}")]
    Open(String),

    /// 播放过程中的传输或解码错误
    #[error("Transport error: {0}")]
    Transport(String),

    /// 连接成功但没有视频流
    #[error("No video stream found")]
    NoVideoStream,
}

impl SourceError {
    /// Structural errors cannot be fixed by reconnecting.
    pub fn is_structural(&self) -> bool {
        matches!(self, SourceError::NoVideoStream)
    }
}

/// 录制错误
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("recording already active")]
    AlreadyActive,

    #[error("cannot open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("unsupported encoder parameters: {0}")]
    Unsupported(String),

    #[error("frame is {got_width}x{got_height}, recording expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("frame buffer does not match {width}x{height}")]
    MalformedFrame { width: u32, height: u32 },

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("close failed: {0}")]
    Close(String),
}

/// 截图错误
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("no frame decoded yet")]
    NoFrame,

    #[error("frame buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("cannot write snapshot: {0}")]
    Write(#[from] image::ImageError),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IP address or hostname is required")]
    MissingHost,

    #[error("config must contain 1 to 4 panels, found {0}")]
    PanelCount(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
