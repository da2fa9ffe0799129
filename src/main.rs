use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use myy_sync_player::player::{MediaBackend, SyntheticBackend, SyntheticSpec};
use myy_sync_player::{
    DisplaySurface, PlaybackManager, PlayerCommand, PlayerConfig, PlayerEvent, VideoFrame,
};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "myy_sync_player")]
#[command(about = "嵌入式显示管线的音视频同步播放引擎")]
#[command(version)]
struct Args {
    /// 媒体文件路径（需要 ffmpeg 特性）
    path: Option<String>,

    /// 使用合成测试源，不依赖 FFmpeg
    #[arg(long)]
    synthetic: bool,

    /// JSON 配置文件
    #[arg(short, long, env = "MYY_PLAYER_CONFIG")]
    config: Option<PathBuf>,

    /// 播放结束后自动重播的次数
    #[arg(long, default_value = "0")]
    loops: u32,

    /// 关闭音频输出
    #[arg(long)]
    no_audio: bool,

    /// 音量 (0 - 100)
    #[arg(long)]
    volume: Option<u8>,

    /// 合成源帧数
    #[arg(long, default_value = "150")]
    frames: u64,

    /// 合成源帧率
    #[arg(long, default_value = "30")]
    fps: u32,
}

/// 把显示请求写到日志的显示表面
#[derive(Default)]
struct LogSurface {
    presented: u64,
    started: Option<Instant>,
}

impl DisplaySurface for LogSurface {
    fn present(&mut self, frame: &VideoFrame) {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.presented += 1;
        if self.presented <= 3 || self.presented % 30 == 0 {
            info!(
                "🖼 显示第 {} 帧: PTS={:?}ms {}x{} {:?}（墙钟 {}ms）",
                self.presented,
                frame.pts,
                frame.layout.width,
                frame.layout.height,
                frame.layout.format,
                started.elapsed().as_millis()
            );
        }
    }

    fn invalidate(&mut self) {}
}

fn run<B: MediaBackend>(backend: B, config: PlayerConfig, path: &str, args: &Args) -> Result<()> {
    let mut manager = PlaybackManager::new(backend, config).context("创建播放管理器失败")?;
    manager.set_auto_restart(args.loops > 0);
    if let Some(volume) = args.volume {
        manager.set_volume(volume);
    }

    let info = manager.set_source(path).context("打开媒体源失败")?;
    info!(
        "📄 {}x{} @ {:.2}fps，时长 {}ms，视频 {}，音频 {}",
        info.width, info.height, info.fps, info.duration, info.video_codec, info.audio_codec
    );

    let events = manager.events();
    let mut surface = LogSurface::default();
    let mut restarts = 0;
    manager.command(PlayerCommand::Start)?;

    loop {
        manager.tick(&mut surface);
        match events.try_recv() {
            Ok(PlayerEvent::Ready) => break,
            Ok(PlayerEvent::Restarted) => {
                restarts += 1;
                info!("🔁 第 {} 次重播", restarts);
                if restarts >= args.loops {
                    manager.set_auto_restart(false);
                }
            }
            Err(_) => {}
        }
        thread::sleep(manager.frame_period());
    }

    let stats = manager.stats();
    info!(
        "✅ 播放完成: 显示 {} 帧，丢帧 {}，重复 {}，缓冲淘汰 {}",
        surface.presented, stats.frame_drop_count, stats.frame_repeat_count, stats.evicted_frames
    );
    Ok(())
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    info!("🎬 MYY Sync Player 启动");

    let mut config = match &args.config {
        Some(path) => PlayerConfig::from_json_file(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if args.no_audio {
        config.audio_enabled = false;
    }

    if args.synthetic || args.path.is_none() {
        if !args.synthetic {
            warn!("⚠️  未指定媒体文件，使用合成测试源");
        }
        let spec = SyntheticSpec {
            frame_count: args.frames,
            fps: args.fps,
            audio: true,
            realtime: true,
            ..SyntheticSpec::default()
        };
        return run(SyntheticBackend::new(spec), config, "synthetic://test-pattern", &args);
    }

    let path = args.path.clone().unwrap_or_default();
    run_file(config, &path, &args)
}

#[cfg(feature = "ffmpeg")]
fn run_file(config: PlayerConfig, path: &str, args: &Args) -> Result<()> {
    run(myy_sync_player::player::FfmpegBackend::new(), config, path, args)
}

#[cfg(not(feature = "ffmpeg"))]
fn run_file(_config: PlayerConfig, path: &str, _args: &Args) -> Result<()> {
    anyhow::bail!("无法播放 {}：未启用 ffmpeg 特性，请使用 --synthetic 或以 --features ffmpeg 构建", path)
}
