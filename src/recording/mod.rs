// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 录制模块 (Recording)
///
/// - RecordingSlot: Idle | Requested | Active, 由工作线程和控制线程共享 (同一把锁)
/// - RecordingSession: 输出容器 + 时间戳重定基
/// - OutputContainer / ContainerFactory: 编码 + 封装后端
use crate::config::RecordingOptions;
use crate::error::RecordingError;
use crate::frame::{Rational, VideoFrame};
use crate::source::StreamInfo;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegContainerFactory;

/// 编码器参数, 由第一帧确定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    /// Time base of the `pts` values passed to [`OutputContainer::encode`].
    pub time_base: Rational,
    pub bitrate: u64,
    pub codec: String,
    pub pixel_format: String,
    pub format: String,
}

/// One open output file with a single video stream.
pub trait OutputContainer: Send {
    /// Encodes `frame` at `pts` and muxes every packet the encoder yields.
    fn encode(&mut self, frame: &VideoFrame, pts: i64) -> Result<(), RecordingError>;

    /// Drains packets still buffered in the encoder into the container.
    fn flush(&mut self) -> Result<(), RecordingError>;

    /// Finalizes and releases the file. Called once, after `flush`.
    fn close(&mut self) -> Result<(), RecordingError>;
}

pub trait ContainerFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn OutputContainer>, RecordingError>;
}

/// 一次录制
pub struct RecordingSession {
    path: PathBuf,
    settings: EncoderSettings,
    container: Box<dyn OutputContainer>,
    rebase: Option<i64>,
    frame_counter: i64,
    last_pts: Option<i64>,
    frames_written: u64,
}

impl RecordingSession {
    /// Opens the output at `path` using `first`'s geometry. `first` is not written.
    pub fn materialize(
        factory: &dyn ContainerFactory,
        path: &Path,
        first: &VideoFrame,
        stream: &StreamInfo,
        options: &RecordingOptions,
    ) -> Result<Self, RecordingError> {
        if first.width == 0 || first.height == 0 {
            return Err(RecordingError::Unsupported(format!(
                "frame size {}x{}",
                first.width, first.height
            )));
        }

        let frame_rate = stream.frame_rate().unwrap_or(options.default_frame_rate);
        if !frame_rate.is_valid() {
            return Err(RecordingError::Unsupported(format!("frame rate {frame_rate}")));
        }

        // 有源时间戳时用流的时间基, 否则按帧序号计时
        let time_base = if first.pts.is_some() && stream.time_base.is_valid() {
            stream.time_base
        } else {
            frame_rate.invert()
        };

        let settings = EncoderSettings {
            width: first.width,
            height: first.height,
            frame_rate,
            time_base,
            bitrate: options.bitrate,
            codec: options.codec.clone(),
            pixel_format: options.pixel_format.clone(),
            format: options.format.clone(),
        };

        let container = factory.create(path, &settings)?;
        tracing::info!(
            path = %path.display(),
            width = settings.width,
            height = settings.height,
            fps = %settings.frame_rate,
            "recording opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            settings,
            container,
            rebase: first.pts,
            frame_counter: 0,
            last_pts: None,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Output timestamp for the next frame: source pts minus the first frame's
    /// pts, or the frame counter when either is missing. Never decreases: if the
    /// source clock jumps back (reconnect), the rebase is re-anchored so the
    /// frame lands one tick after the previous one.
    fn next_pts(&mut self, frame: &VideoFrame) -> i64 {
        let candidate = match (frame.pts, self.rebase) {
            (Some(pts), Some(rebase)) => pts - rebase,
            _ => self.frame_counter,
        };

        let pts = match self.last_pts {
            Some(last) if candidate < last => {
                if let Some(src) = frame.pts {
                    self.rebase = Some(src - (last + 1));
                }
                tracing::debug!(candidate, last, "source clock went backwards, re-anchoring");
                last + 1
            }
            _ => candidate,
        };

        self.frame_counter += 1;
        self.last_pts = Some(pts);
        pts
    }

    pub fn write(&mut self, frame: &VideoFrame) -> Result<(), RecordingError> {
        if !frame.is_well_formed() {
            return Err(RecordingError::MalformedFrame {
                width: frame.width,
                height: frame.height,
            });
        }
        if frame.width != self.settings.width || frame.height != self.settings.height {
            return Err(RecordingError::FrameSize {
                width: self.settings.width,
                height: self.settings.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }
        let pts = self.next_pts(frame);
        self.container.encode(frame, pts)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Flushes the encoder, then closes the file. The file is closed even when
    /// the flush fails; the first error is returned.
    pub fn finish(mut self) -> Result<u64, RecordingError> {
        let flushed = self.container.flush();
        let closed = self.container.close();
        tracing::info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "recording closed"
        );
        flushed.and(closed).map(|()| self.frames_written)
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("rebase", &self.rebase)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

/// 录制状态: 标志和资源合为一个值, 不会出现二者不一致
#[derive(Debug, Default)]
pub enum RecordingSlot {
    #[default]
    Idle,
    /// 已请求, 等待下一帧创建输出
    Requested { path: PathBuf },
    Active(RecordingSession),
}

impl RecordingSlot {
    pub fn is_recording(&self) -> bool {
        !matches!(self, RecordingSlot::Idle)
    }

    pub fn request(&mut self, path: PathBuf) -> Result<(), RecordingError> {
        if self.is_recording() {
            return Err(RecordingError::AlreadyActive);
        }
        *self = RecordingSlot::Requested { path };
        Ok(())
    }

    pub fn take(&mut self) -> RecordingSlot {
        std::mem::take(self)
    }
}
