// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use anyhow::{bail, Context, Result};
use clap::Parser;
/// 四路 RTSP 监控 (无界面)
///
/// 每路一个拉流线程, 断线自动重连, 可同时录制为 MKV.
/// 直接运行: cargo run --bin quadcam --features ffmpeg --release -- --url rtsp://...
use crossbeam_channel::{after, unbounded, Receiver, Select};
use quadcam::config::{DEFAULT_LATENCY_MS, MAX_PANELS};
use quadcam::recording::FfmpegContainerFactory;
use quadcam::source::FfmpegSource;
use quadcam::{
    gen_time_string, ChannelSink, ConfigError, ConnectionTarget, PanelSet, StreamWorker,
    Transport, VideoFrame, WorkerConfig, WorkerEvent,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 统计输出间隔
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// RTSP 多路拉流 + 录制
#[derive(Parser, Debug)]
#[command(author, version, about = "RTSP 多路拉流 + 录制", long_about = None)]
struct Args {
    /// RTSP流地址 (可重复, 最多4路)
    #[arg(short, long = "url", conflicts_with = "config")]
    urls: Vec<String>,

    /// 面板配置文件 (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 传输方式 (仅对 --url 生效)
    #[arg(short, long, value_enum, default_value_t = Transport::Tcp)]
    transport: Transport,

    /// 最大延迟 (毫秒, 仅对 --url 生效)
    #[arg(short, long, default_value_t = DEFAULT_LATENCY_MS)]
    latency: u32,

    /// 启动后立即录制到该目录
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// 退出时保存每路最新帧到该目录
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// 运行时长 (秒), 0 表示按回车退出
    #[arg(short, long, default_value_t = 0)]
    duration: u64,

    /// 重连等待 (毫秒)
    #[arg(long, default_value_t = 2000)]
    backoff_ms: u64,
}

struct Panel {
    title: String,
    target: ConnectionTarget,
    worker: StreamWorker,
    frames: Receiver<Arc<VideoFrame>>,
    events: Receiver<WorkerEvent>,
    frames_seen: u64,
    size: (u32, u32),
    stopped: bool,
}

enum Tick {
    Quit,
    Idle,
    Event(usize, Option<WorkerEvent>),
    Frame(usize, Option<Arc<VideoFrame>>),
}

fn targets(args: &Args) -> Result<Vec<(String, ConnectionTarget)>> {
    if let Some(path) = &args.config {
        let set = PanelSet::load(path)
            .with_context(|| format!("loading panel config {}", path.display()))?;
        let mut out = Vec::new();
        for (i, cam) in set.panels.iter().enumerate() {
            // 没填地址的面板不启动
            match cam.target() {
                Ok(target) => out.push((cam.display_title(i), target)),
                Err(ConfigError::MissingHost) => {
                    println!("⚠️  {}: 未填写地址, 跳过", cam.display_title(i))
                }
                Err(e) => return Err(e).with_context(|| cam.display_title(i)),
            }
        }
        if out.is_empty() {
            bail!("no panel in {} has a host", path.display());
        }
        return Ok(out);
    }

    if args.urls.is_empty() {
        bail!("nothing to play: pass --url or --config");
    }
    if args.urls.len() > MAX_PANELS {
        bail!("at most {} streams, got {}", MAX_PANELS, args.urls.len());
    }
    Ok(args
        .urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            (
                format!("Feed {}", i + 1),
                ConnectionTarget::new(url.clone(), args.transport, args.latency),
            )
        })
        .collect())
}

/// 文件名安全的标题
fn file_stem(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// 超时或回车
fn quit_signal(duration: u64) -> Receiver<Instant> {
    if duration > 0 {
        return after(Duration::from_secs(duration));
    }
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(Instant::now());
    });
    println!("⏎  按回车退出");
    rx
}

fn start_all(panels: &[Panel], record: Option<&Path>) -> Result<()> {
    for panel in panels {
        panel
            .worker
            .start(panel.target.clone())
            .with_context(|| format!("starting {}", panel.title))?;
        println!("🎬 {}: {}", panel.title, panel.target.redacted_url());

        if let Some(dir) = record {
            let path = dir.join(format!(
                "{}-{}.mkv",
                file_stem(&panel.title),
                gen_time_string("-")
            ));
            if let Err(e) = panel.worker.start_recording(&path) {
                eprintln!("❌ {}: {}", panel.title, e);
            }
        }
    }
    Ok(())
}

fn stop_all(panels: &[Panel], snapshot: Option<&Path>) {
    for panel in panels {
        if let Some(dir) = snapshot {
            let path = dir.join(format!(
                "{}-{}.png",
                file_stem(&panel.title),
                gen_time_string("-")
            ));
            match panel.worker.save_snapshot(&path) {
                Ok(()) => println!("📸 {}: {}", panel.title, path.display()),
                Err(e) => eprintln!("⚠️  {}: snapshot skipped: {}", panel.title, e),
            }
        }
        if let Err(e) = panel.worker.stop_recording() {
            eprintln!("❌ {}: {}", panel.title, e);
        }
    }
    for panel in panels {
        panel.worker.stop();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "quadcam=info".into()))
        .init();

    let args = Args::parse();
    for dir in [&args.record, &args.snapshot].into_iter().flatten() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let config = WorkerConfig {
        backoff_ms: args.backoff_ms,
        ..Default::default()
    };
    let source = Arc::new(FfmpegSource::default());
    let factory = Arc::new(FfmpegContainerFactory);

    let mut panels: Vec<Panel> = targets(&args)?
        .into_iter()
        .map(|(title, target)| {
            let (sink, frames, events) = ChannelSink::new(2);
            let worker =
                StreamWorker::new(title.clone(), source.clone(), factory.clone(), Arc::new(sink))
                    .with_config(config.clone());
            Panel {
                title,
                target,
                worker,
                frames,
                events,
                frames_seen: 0,
                size: (0, 0),
                stopped: false,
            }
        })
        .collect();

    println!("✅ {} 路 | 重连等待 {}", panels.len(), config.backoff_label());
    start_all(&panels, args.record.as_deref())?;

    let quit = quit_signal(args.duration);
    let mut last_stats = Instant::now();

    loop {
        let tick = {
            // 索引: 0 = 退出, 1 + 2i = 第 i 路事件, 2 + 2i = 第 i 路帧
            let mut sel = Select::new();
            sel.recv(&quit);
            for panel in &panels {
                sel.recv(&panel.events);
                sel.recv(&panel.frames);
            }
            match sel.select_timeout(Duration::from_millis(500)) {
                Err(_) => Tick::Idle,
                Ok(op) => match op.index() {
                    0 => {
                        let _ = op.recv(&quit);
                        Tick::Quit
                    }
                    n if (n - 1) % 2 == 0 => {
                        let i = (n - 1) / 2;
                        Tick::Event(i, op.recv(&panels[i].events).ok())
                    }
                    n => {
                        let i = (n - 1) / 2;
                        Tick::Frame(i, op.recv(&panels[i].frames).ok())
                    }
                },
            }
        };

        match tick {
            Tick::Quit => break,
            Tick::Idle => {}
            Tick::Event(i, event) => {
                let panel = &mut panels[i];
                match event {
                    Some(WorkerEvent::Status(text)) => println!("📡 {}: {}", panel.title, text),
                    Some(WorkerEvent::Recording(true)) => println!("⏺  {}: 录制中", panel.title),
                    Some(WorkerEvent::Recording(false)) => println!("⏹  {}: 录制停止", panel.title),
                    Some(WorkerEvent::Stopped) => {
                        println!("🛑 {}: 已停止", panel.title);
                        panel.stopped = true;
                    }
                    None => panel.stopped = true,
                }
            }
            Tick::Frame(i, frame) => {
                if let Some(frame) = frame {
                    let panel = &mut panels[i];
                    panel.frames_seen += 1;
                    panel.size = (frame.width, frame.height);
                }
            }
        }

        if panels.iter().all(|p| p.stopped) {
            println!("所有通道已停止");
            break;
        }

        let elapsed = last_stats.elapsed();
        if elapsed >= STATS_INTERVAL {
            for panel in panels.iter_mut().filter(|p| !p.stopped) {
                let fps = panel.frames_seen as f64 / elapsed.as_secs_f64();
                println!(
                    "📊 {}: {:.1} fps | {}x{} | {}",
                    panel.title,
                    fps,
                    panel.size.0,
                    panel.size.1,
                    if panel.worker.is_recording() { "REC" } else { "-" }
                );
                panel.frames_seen = 0;
            }
            last_stats = Instant::now();
        }
    }

    stop_all(&panels, args.snapshot.as_deref());
    println!("👋 退出");
    Ok(())
}
