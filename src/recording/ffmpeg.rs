// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// FFmpeg 录制后端: RGB24 原始帧 → H.264 → Matroska
///
/// 原始帧通过 read callback 喂给 rawvideo 解复用器, 输出端的帧过滤器按顺序
/// 写回重定基后的时间戳, 再由 FFmpeg 编码并封装.
///
/// rawvideo 的时钟就是会话时间基, 时间戳原样传给编码器, 不按帧率量化.
use super::{ContainerFactory, EncoderSettings, OutputContainer};
use crate::error::RecordingError;
use crate::frame::{Rational, VideoFrame};
use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender};
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input, Output};
use std::path::Path;
use std::time::Duration;

/// AVERROR_EOF = -MKTAG('E','O','F',' ')
const AVERROR_EOF: i32 = -0x2046_4F45;

/// 编码队列长度
const FRAME_QUEUE: usize = 8;

/// 队列满时最多等待的帧间隔数; 超过才丢帧并报告
const ENCODE_WAIT_FRAMES: f64 = 4.0;
const ENCODE_WAIT_MIN: Duration = Duration::from_millis(100);
const ENCODE_WAIT_MAX: Duration = Duration::from_secs(1);

/// How long `encode` may block on a full queue: a few frame intervals.
fn encode_wait(frame_rate: Rational) -> Duration {
    if !frame_rate.is_valid() {
        return ENCODE_WAIT_MAX;
    }
    Duration::from_secs_f64(ENCODE_WAIT_FRAMES / frame_rate.as_f64())
        .clamp(ENCODE_WAIT_MIN, ENCODE_WAIT_MAX)
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegContainerFactory;

impl ContainerFactory for FfmpegContainerFactory {
    fn create(
        &self,
        path: &Path,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn OutputContainer>, RecordingError> {
        let open_err = |reason: String| RecordingError::Open {
            path: path.to_path_buf(),
            reason,
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| open_err("path is not valid UTF-8".to_string()))?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.is_dir() {
                return Err(open_err(format!("{} is not a directory", dir.display())));
            }
        }

        let (frames_tx, frames_rx) = bounded::<(i64, Vec<u8>)>(FRAME_QUEUE);
        let (pts_tx, pts_rx) = unbounded::<i64>();

        let mut reader = RawFrameReader::new(frames_rx, pts_tx);
        let video_size = format!("{}x{}", settings.width, settings.height);
        // 输入时钟 = 会话时间基 (例如 1/90000 → "90000/1")
        let clock = settings.time_base.invert().to_string();
        let input = Input::new_by_read_callback(move |buf: &mut [u8]| reader.read(buf))
            .set_format("rawvideo")
            .set_input_opts(
                [
                    ("video_size", video_size.as_str()),
                    ("pixel_format", "rgb24"),
                    ("framerate", clock.as_str()),
                ]
                .into(),
            );

        let stamper = PtsStamper::new(pts_rx);
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("timestamps", Box::new(stamper));

        let bitrate = settings.bitrate.to_string();
        let mut output = Output::from(path_str)
            .set_format(settings.format.as_str())
            .set_video_codec(settings.codec.as_str())
            .set_video_codec_opt("b", bitrate.as_str());
        if settings.codec == "libx264" {
            // 输入时钟很细, 码率控制按标称帧率
            let fps = format!("fps={}", settings.frame_rate);
            output = output.set_video_codec_opt("x264-params", fps.as_str());
        }
        let output = output.add_frame_pipeline(pipe);

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc(format!("format={}", settings.pixel_format))
            .output(output)
            .build()
            .map_err(|e| open_err(e.to_string()))?;
        let scheduler = ctx.start().map_err(|e| open_err(e.to_string()))?;

        Ok(Box::new(FfmpegContainer {
            frames: Some(frames_tx),
            scheduler: Some(scheduler),
            frame_len: settings.width as usize * settings.height as usize * VideoFrame::BYTES_PER_PIXEL,
            wait: encode_wait(settings.frame_rate),
        }))
    }
}

struct FfmpegContainer {
    frames: Option<Sender<(i64, Vec<u8>)>>,
    scheduler: Option<FfmpegScheduler<Running>>,
    frame_len: usize,
    wait: Duration,
}

impl OutputContainer for FfmpegContainer {
    fn encode(&mut self, frame: &VideoFrame, pts: i64) -> Result<(), RecordingError> {
        let tx = self
            .frames
            .as_ref()
            .ok_or_else(|| RecordingError::Encode("encoder already flushed".to_string()))?;
        let packed = frame.packed().ok_or(RecordingError::MalformedFrame {
            width: frame.width,
            height: frame.height,
        })?;
        if packed.len() != self.frame_len {
            return Err(RecordingError::Encode(format!(
                "expected {} bytes, got {}",
                self.frame_len,
                packed.len()
            )));
        }
        // 编码器跟不上时短暂阻塞解码循环, 而不是立即丢帧
        match tx.send_timeout((pts, packed.into_owned()), self.wait) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RecordingError::Encode(format!(
                "encoder stalled for {} ms, frame dropped",
                self.wait.as_millis()
            ))),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(RecordingError::Encode("encoder pipeline stopped".to_string()))
            }
        }
    }

    fn flush(&mut self) -> Result<(), RecordingError> {
        // 关闭输入 → read callback 返回 EOF → 编码器排空, 写入尾部
        self.frames.take();
        match self.scheduler.take() {
            Some(sch) => sch.wait().map_err(|e| RecordingError::Flush(e.to_string())),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), RecordingError> {
        self.frames.take();
        match self.scheduler.take() {
            Some(sch) => sch.wait().map_err(|e| RecordingError::Close(e.to_string())),
            None => Ok(()),
        }
    }
}

/// rawvideo 输入: 按顺序吐出排队的帧字节
struct RawFrameReader {
    frames: Receiver<(i64, Vec<u8>)>,
    pts: Sender<i64>,
    current: Vec<u8>,
    offset: usize,
}

impl RawFrameReader {
    fn new(frames: Receiver<(i64, Vec<u8>)>, pts: Sender<i64>) -> Self {
        Self {
            frames,
            pts,
            current: Vec::new(),
            offset: 0,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> i32 {
        if self.offset >= self.current.len() {
            match self.frames.recv() {
                Ok((pts, bytes)) => {
                    // 先登记时间戳, 保证 PtsStamper 取到的顺序与帧一致
                    let _ = self.pts.send(pts);
                    self.current = bytes;
                    self.offset = 0;
                }
                Err(_) => return AVERROR_EOF,
            }
        }
        let n = buf.len().min(self.current.len() - self.offset).min(i32::MAX as usize);
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        n as i32
    }
}

/// 按顺序把会话时间戳写回帧; 编码器要求严格递增, 重复时顺延一个源时钟刻度
struct PtsStamper {
    pts: Receiver<i64>,
    last: Option<i64>,
}

impl PtsStamper {
    fn new(pts: Receiver<i64>) -> Self {
        Self { pts, last: None }
    }

    fn next(&mut self) -> i64 {
        let pts = self
            .pts
            .try_recv()
            .unwrap_or_else(|_| self.last.map_or(0, |l| l + 1));
        let pts = match self.last {
            Some(last) if pts <= last => last + 1,
            _ => pts,
        };
        self.last = Some(pts);
        pts
    }
}

impl FrameFilter for PtsStamper {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        Ok(())
    }

    fn filter_frame(
        &mut self,
        mut frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        let pts = self.next();
        frame.set_pts(Some(pts));
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {}
}
