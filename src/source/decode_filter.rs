// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use super::handoff::Decoded;
use crate::frame::{Rational, VideoFrame};
use crossbeam_channel::{SendTimeoutError, Sender};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SEND_SLICE: Duration = Duration::from_millis(100);

/// FFmpeg解码过滤器: RTSP流 → RGB24帧 (拷贝出解码器缓冲区)
pub struct DecodeFilter {
    tx: Sender<Decoded>,
    closed: Arc<AtomicBool>,
    count: usize,
    last: Instant,
    current_fps: f64,
    dropped_frames: usize, // 丢弃的帧数
    total_frames: usize,   // 总帧数
}

impl DecodeFilter {
    pub fn new(tx: Sender<Decoded>, closed: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            closed,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            tracing::debug!(frame = self.total_frames, "dropping frame: {}", reason);
        }
    }

    /// 拷贝 RGB24 平面. 解码器会在下一帧复用这块内存.
    fn copy_out(&mut self, frame: &Frame) -> Option<Decoded> {
        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame("empty or corrupt");
                return None;
            }

            let raw = &*frame.as_ptr();
            if raw.width <= 0 || raw.height <= 0 {
                self.drop_frame("invalid size");
                return None;
            }
            let w = raw.width as u32;
            let h = raw.height as u32;

            let plane = raw.data[0];
            let stride = raw.linesize[0];
            let row_len = w as usize * VideoFrame::BYTES_PER_PIXEL;
            if plane.is_null() || stride <= 0 || (stride as usize) < row_len {
                self.drop_frame("bad plane layout");
                return None;
            }
            let stride = stride as usize;

            // 没有有效时间基的 pts 无法换算, 交给录制端按帧计数
            let time_base = Rational::new(raw.time_base.num, raw.time_base.den);
            let pts = frame.pts().filter(|_| time_base.is_valid());

            let len = stride * (h as usize - 1) + row_len;
            let src = std::slice::from_raw_parts(plane as *const u8, len);
            let copied = VideoFrame::copy_from_strided(w, h, src, stride, pts)?;
            Some(Decoded {
                frame: copied,
                time_base,
                duration: raw.duration.max(0),
            })
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 接收端已关闭: 让 FFmpeg 结束这条管线
        if self.closed.load(Ordering::Relaxed) {
            return Err("stream closed".to_string());
        }

        self.total_frames += 1;
        let Some(mut decoded) = self.copy_out(&frame) else {
            return Ok(None);
        };
        self.count += 1;

        // 计算FPS
        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            self.current_fps = self.count as f64 / elapsed;
            tracing::trace!(
                fps = self.current_fps,
                total = self.total_frames,
                dropped = self.dropped_frames,
                "📺 解码统计"
            );
            self.last = Instant::now();
            self.count = 0;
        }

        // 阻塞发送, 由工作线程的拉取节奏反压; 每个切片检查一次关闭标志
        loop {
            match self.tx.send_timeout(decoded, SEND_SLICE) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.closed.load(Ordering::Relaxed) {
                        return Err("stream closed".to_string());
                    }
                    decoded = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err("stream closed".to_string());
                }
            }
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::debug!(
            total = self.total_frames,
            dropped = self.dropped_frames,
            "✅ 解码线程退出"
        );
    }
}
