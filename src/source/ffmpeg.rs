// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// RTSP主动拉流解码器 (FFmpeg)
/// FFmpeg-backed media source: one connection per attempt, decode to RGB24, hand frames to the worker
use super::decode_filter::DecodeFilter;
use super::handoff::{Decoded, Done, Handoff};
use super::{FrameStream, MediaSource};
use crate::config::ConnectionTarget;
use crate::error::SourceError;
use crossbeam_channel::bounded;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// 等第一帧时检查管线结果的间隔
const CONNECT_POLL: Duration = Duration::from_millis(50);

/// FFmpeg 媒体源
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    /// 解码线程与工作线程之间的帧队列长度
    frame_queue: usize,
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self { frame_queue: 2 }
    }
}

impl FfmpegSource {
    pub fn new(frame_queue: usize) -> Self {
        Self {
            frame_queue: frame_queue.max(1),
        }
    }
}

/// RTSP 传输 + 超时 + 低延迟参数
fn input_for(target: &ConnectionTarget, timeout: Duration) -> Input {
    let timeout_us = (timeout.as_micros() as u64).to_string();
    let max_delay = target.max_delay_us().to_string();
    Input::new(target.url.as_str()).set_input_opts(
        [
            ("rtsp_transport", target.transport.as_str()),
            ("timeout", timeout_us.as_str()),
            ("max_delay", max_delay.as_str()),
            ("threads", "auto"),
        ]
        .into(),
    )
}

impl MediaSource for FfmpegSource {
    /// Opens the connection once with the configured transport and timeout,
    /// then waits up to `timeout` for the first video frame. A source that
    /// finishes without ever yielding a video frame has no video stream.
    fn open(
        &self,
        target: &ConnectionTarget,
        timeout: Duration,
    ) -> Result<Box<dyn FrameStream>, SourceError> {
        let (tx, frames) = bounded::<Decoded>(self.frame_queue);
        let closed = Arc::new(AtomicBool::new(false));
        let filter = DecodeFilter::new(tx, closed.clone());

        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let ctx = FfmpegContext::builder()
            .input(input_for(target, timeout))
            .filter_desc("format=rgb24")
            .output(out)
            .build()
            .map_err(|e| SourceError::Open(e.to_string()))?;

        let sch = ctx.start().map_err(|e| SourceError::Open(e.to_string()))?;

        // wait() 会阻塞到管线结束, 单独线程等待并报告结果
        let (done_tx, done) = bounded::<Done>(1);
        std::thread::Builder::new()
            .name("ffmpeg-wait".to_string())
            .spawn(move || {
                let result = sch.wait().map_err(|e| e.to_string());
                let _ = done_tx.send(result);
            })
            .map_err(|e| SourceError::Open(e.to_string()))?;

        let stream = Handoff::connect(frames, done, closed, timeout, CONNECT_POLL)?;
        if let Some(info) = stream.video_stream() {
            tracing::debug!(
                width = info.width,
                height = info.height,
                time_base = %info.time_base,
                fps = ?info.avg_frame_rate,
                "video stream found"
            );
        }
        Ok(Box::new(stream))
    }
}
