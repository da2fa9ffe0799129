use crate::core::{
    MediaInfo, PlaybackState, PlaybackStats, PlayerCommand, PlayerConfig, PlayerError, PlayerEvent,
    Result, SyncClock,
};
use crate::player::audio_sink::AudioSink;
use crate::player::frame_ring::FrameRing;
use crate::player::media_source::{MediaBackend, MediaSource, OpenedMedia};
use crate::player::playback_thread::{PlaybackShared, PlaybackThread, ProducerParts, ThreadTiming};
use crate::player::render::{DisplaySurface, RenderConsumer, TickOutcome};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

type PartsOf<B> = ProducerParts<
    <B as MediaBackend>::Source,
    <B as MediaBackend>::Converter,
    <B as MediaBackend>::Resampler,
    <B as MediaBackend>::Device,
>;

type ThreadOf<B> = PlaybackThread<
    <B as MediaBackend>::Source,
    <B as MediaBackend>::Converter,
    <B as MediaBackend>::Resampler,
    <B as MediaBackend>::Device,
>;

/// 一个已打开媒体源的全部状态
struct Session<B: MediaBackend> {
    path: String,
    info: MediaInfo,
    shared: Arc<PlaybackShared>,
    consumer: RenderConsumer,
    frame_period: Duration,
    has_audio_output: bool,
    /// 线程未运行时由会话持有的协作者
    idle: Option<PartsOf<B>>,
    thread: Option<ThreadOf<B>>,
}

/// 播放管理器 - 整体控制播放流程
///
/// 在显示线程上使用：`set_source()` 打开媒体，`command()` 控制播放，
/// 按 `frame_period()` 周期调用 `tick()` 把帧交给显示表面。
pub struct PlaybackManager<B: MediaBackend> {
    backend: B,
    config: PlayerConfig,
    clock: SyncClock,
    session: Option<Session<B>>,
    auto_restart: bool,
    audio_enabled: bool,
    volume: u8,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

impl<B: MediaBackend> PlaybackManager<B> {
    pub fn new(backend: B, config: PlayerConfig) -> Result<Self> {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        config.validate()?;

        let clock = SyncClock::new(config.sync_threshold_ms, config.max_frame_delay_ms);
        clock.set_sync_enabled(config.sync_enabled);
        let (events_tx, events_rx) = unbounded();

        Ok(Self {
            backend,
            auto_restart: config.auto_restart,
            audio_enabled: config.audio_enabled,
            volume: config.volume.min(100),
            config,
            clock,
            session: None,
            events_tx,
            events_rx,
        })
    }

    /// 打开媒体源
    ///
    /// 先关闭之前的会话（join 播放线程、销毁帧缓冲），
    /// 打开成功后会话处于停止状态，等待 `command(Start)`。
    pub fn set_source(&mut self, path: &str) -> Result<MediaInfo> {
        info!("{} 📂 打开媒体源: {}", log_ctx(), path);
        self.close();

        // 设备是否打开取决于当前的音频开关，而不是创建时的配置
        let open_config = PlayerConfig {
            audio_enabled: self.audio_enabled,
            ..self.config.clone()
        };
        let OpenedMedia {
            source,
            converter,
            resampler,
            device,
        } = self.backend.open(path, &open_config).map_err(|e| {
            error!("{} ❌ 打开失败: {}", log_ctx(), e);
            e
        })?;

        let info = source.info().clone();
        let ring = Arc::new(FrameRing::new(self.config.ring_capacity)?);

        let has_audio_output = info.has_audio() && resampler.is_some() && device.is_some();
        if info.has_audio() && !has_audio_output {
            warn!("{} ⚠️  音频输出不可用，仅播放视频", log_ctx());
        }

        let frame_period = Duration::from_millis(
            info.frame_refresh_period()
                .unwrap_or(self.config.default_frame_period_ms),
        );
        info!(
            "{} ✅ 媒体信息: {}x{} @ {:.2}fps，刷新周期 {:?}，音频: {}",
            log_ctx(),
            info.width,
            info.height,
            info.fps,
            frame_period,
            has_audio_output
        );

        self.clock.reset();
        let shared = Arc::new(PlaybackShared::new(
            self.clock.clone(),
            ring.clone(),
            self.audio_enabled,
            self.volume,
        ));
        let consumer = RenderConsumer::new(ring, self.clock.clone(), self.config.cache_drop_interval);

        self.session = Some(Session {
            path: path.to_string(),
            info: info.clone(),
            shared,
            consumer,
            frame_period,
            has_audio_output,
            idle: Some(ProducerParts {
                source,
                converter,
                resampler,
                sink: AudioSink::new(device),
            }),
            thread: None,
        });
        self.refresh_audio_presence();
        Ok(info)
    }

    /// 关闭当前会话并释放所有帧
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!("{} 🔒 关闭媒体源: {}", log_ctx(), session.path);
        if let Some(mut thread) = session.thread.take() {
            thread.stop();
        }
        let released = session.shared.ring.destroy();
        debug!("{} 释放 {} 个缓冲帧", log_ctx(), released);
        self.clock.reset();
    }

    /// 执行播放控制命令
    pub fn command(&mut self, command: PlayerCommand) -> Result<()> {
        if self.session.is_none() {
            error!("{} ❌ 未打开媒体源，忽略命令 {:?}", log_ctx(), command);
            return Err(PlayerError::NotOpened);
        }
        info!("{} 🎮 命令: {:?}", log_ctx(), command);

        match command {
            PlayerCommand::Start => self.start_playback(),
            PlayerCommand::Stop => {
                self.stop_playback();
                Ok(())
            }
            PlayerCommand::Pause => {
                if let Some(session) = &self.session {
                    if !session.shared.control.pause() {
                        debug!("{} 当前状态 {:?} 无法暂停", log_ctx(), session.shared.control.state());
                    }
                }
                Ok(())
            }
            PlayerCommand::Resume => {
                if let Some(session) = &self.session {
                    if !session.shared.control.resume() {
                        debug!("{} 当前状态 {:?} 无法恢复", log_ctx(), session.shared.control.state());
                    }
                }
                Ok(())
            }
        }
    }

    /// 从头开始播放（已在播放时先停止）
    fn start_playback(&mut self) -> Result<()> {
        self.halt();

        let timing = ThreadTiming {
            pause_poll: self.config.pause_poll(),
            read_retry_backoff: self.config.read_retry_backoff(),
        };
        let session = self.session.as_mut().ok_or(PlayerError::NotOpened)?;
        let Some(parts) = session.idle.take() else {
            error!("{} ❌ 会话资源已丢失，请重新打开媒体源", log_ctx());
            return Err(PlayerError::NotOpened);
        };

        self.clock.reset();
        session.shared.ring.clear();
        session.thread = Some(PlaybackThread::start(parts, session.shared.clone(), timing)?);
        info!("{} ▶️ 开始播放: {}", log_ctx(), session.path);
        Ok(())
    }

    /// 停止播放并回到起点
    fn stop_playback(&mut self) {
        self.halt();
        self.clock.reset();
        if let Some(session) = &self.session {
            session.shared.ring.clear();
        }
    }

    /// join 播放线程，取回协作者并 seek 回起点
    fn halt(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(mut thread) = session.thread.take() {
            session.idle = thread.stop();
        }
        if let Some(parts) = session.idle.as_mut() {
            if let Err(e) = parts.source.rewind() {
                warn!("{} ⚠️  回到起点失败: {}", log_ctx(), e);
            }
        }
    }

    /// 显示周期回调
    ///
    /// 缓冲区空且播放线程已结束时，按策略自动重播（发送 `Restarted`）
    /// 或停止播放（发送一次 `Ready`）。
    pub fn tick<S: DisplaySurface + ?Sized>(&mut self, surface: &mut S) -> TickOutcome {
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Idle;
        };
        if session.thread.is_none() {
            return TickOutcome::Idle;
        }

        // 线程异常退出（panic）时状态可能仍停在 Running
        let thread_alive = session.thread.as_ref().is_some_and(|t| !t.is_finished());
        let running = session.shared.control.is_running() && thread_alive;
        let outcome = session.consumer.tick(running, surface);
        if outcome != TickOutcome::EndOfStream {
            return outcome;
        }

        if self.auto_restart {
            info!("{} 🔁 播放结束，自动重播", log_ctx());
            match self.start_playback() {
                Ok(()) => {
                    let _ = self.events_tx.send(PlayerEvent::Restarted);
                }
                Err(e) => {
                    error!("{} ❌ 自动重播失败: {}", log_ctx(), e);
                    self.stop_playback();
                    let _ = self.events_tx.send(PlayerEvent::Ready);
                }
            }
        } else {
            info!("{} ⏹ 播放结束", log_ctx());
            self.stop_playback();
            let _ = self.events_tx.send(PlayerEvent::Ready);
        }
        outcome
    }

    /// 事件接收端（可克隆给多个监听者）
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    pub fn set_auto_restart(&mut self, enabled: bool) {
        self.auto_restart = enabled;
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    /// 运行时开关音频输出，关闭后播放线程直接丢弃音频包
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        if let Some(session) = &self.session {
            session.shared.set_audio_enabled(enabled);
        }
        self.refresh_audio_presence();
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// 设置音量（0 - 100，超出范围截断）
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        if let Some(session) = &self.session {
            session.shared.set_volume(self.volume);
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    // 没有音频主时钟时不做同步判断，避免过期的音频时钟导致持续重复帧
    fn refresh_audio_presence(&self) {
        let present = self
            .session
            .as_ref()
            .map(|s| s.has_audio_output && self.audio_enabled)
            .unwrap_or(false);
        self.clock.set_audio_present(present);
    }

    pub fn state(&self) -> PlaybackState {
        match &self.session {
            Some(session) if session.thread.is_some() => session.shared.control.state(),
            _ => PlaybackState::Stopped,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.session.is_some()
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    /// 显示刷新周期（来自平均帧率）
    pub fn frame_period(&self) -> Duration {
        self.session
            .as_ref()
            .map(|s| s.frame_period)
            .unwrap_or(Duration::from_millis(self.config.default_frame_period_ms))
    }

    pub fn clock(&self) -> &SyncClock {
        &self.clock
    }

    pub fn stats(&self) -> PlaybackStats {
        let (buffered_frames, evicted_frames) = self
            .session
            .as_ref()
            .map(|s| (s.shared.ring.len(), s.shared.ring.evicted_count()))
            .unwrap_or((0, 0));
        PlaybackStats {
            video_clock: self.clock.video_clock(),
            audio_clock: self.clock.audio_clock(),
            frame_drop_count: self.clock.frame_drop_count(),
            frame_repeat_count: self.clock.frame_repeat_count(),
            buffered_frames,
            evicted_frames,
        }
    }

    /// 查询媒体文件的视频帧数（只读取媒体信息，不影响当前会话，也不打开输出设备）
    pub fn frame_count(&mut self, path: &str) -> Result<i64> {
        Ok(self.backend.probe(path)?.frame_count)
    }
}

impl<B: MediaBackend> Drop for PlaybackManager<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VideoFrame;
    use crate::player::synthetic::{SyntheticBackend, SyntheticSpec};
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingSurface {
        presented: usize,
    }

    impl DisplaySurface for CountingSurface {
        fn present(&mut self, _frame: &VideoFrame) {
            self.presented += 1;
        }

        fn invalidate(&mut self) {}
    }

    fn manager(spec: SyntheticSpec) -> PlaybackManager<SyntheticBackend> {
        PlaybackManager::new(SyntheticBackend::new(spec), PlayerConfig::default()).unwrap()
    }

    /// 反复 tick 直到收到事件或超时
    fn tick_until_event(
        manager: &mut PlaybackManager<SyntheticBackend>,
        surface: &mut CountingSurface,
    ) -> Option<PlayerEvent> {
        let events = manager.events();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            manager.tick(surface);
            if let Ok(event) = events.try_recv() {
                return Some(event);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_command_without_source_fails() {
        let mut manager = manager(SyntheticSpec::default());
        assert!(matches!(manager.command(PlayerCommand::Start), Err(PlayerError::NotOpened)));
        assert_eq!(manager.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_open_without_video_fails() {
        let mut manager = manager(SyntheticSpec {
            video: false,
            ..SyntheticSpec::default()
        });
        assert!(manager.set_source("clip").is_err());
        assert!(!manager.is_opened());
    }

    #[test]
    fn test_frame_period_from_average_rate() {
        let mut manager = manager(SyntheticSpec {
            fps: 25,
            ..SyntheticSpec::default()
        });
        assert_eq!(manager.frame_period(), Duration::from_millis(33));
        manager.set_source("clip").unwrap();
        assert_eq!(manager.frame_period(), Duration::from_millis(40));
    }

    #[test]
    fn test_ready_fires_once_at_end() {
        let mut manager = manager(SyntheticSpec {
            frame_count: 12,
            ..SyntheticSpec::default()
        });
        manager.set_source("clip").unwrap();
        manager.command(PlayerCommand::Start).unwrap();

        let mut surface = CountingSurface::default();
        assert_eq!(tick_until_event(&mut manager, &mut surface), Some(PlayerEvent::Ready));
        assert!(surface.presented > 0);
        assert_eq!(manager.state(), PlaybackState::Stopped);

        for _ in 0..10 {
            assert_eq!(manager.tick(&mut surface), TickOutcome::Idle);
        }
        assert!(manager.events().try_recv().is_err());
    }

    #[test]
    fn test_auto_restart_replays_from_start() {
        let mut manager = manager(SyntheticSpec {
            frame_count: 6,
            ..SyntheticSpec::default()
        });
        manager.set_auto_restart(true);
        manager.set_source("clip").unwrap();
        manager.command(PlayerCommand::Start).unwrap();

        let mut surface = CountingSurface::default();
        assert_eq!(tick_until_event(&mut manager, &mut surface), Some(PlayerEvent::Restarted));
        assert_ne!(manager.state(), PlaybackState::Stopped);

        manager.set_auto_restart(false);
        assert_eq!(tick_until_event(&mut manager, &mut surface), Some(PlayerEvent::Ready));
    }

    #[test]
    fn test_pause_resume_and_stop() {
        let mut manager = manager(SyntheticSpec {
            frame_count: u64::MAX,
            ..SyntheticSpec::default()
        });
        manager.set_source("clip").unwrap();
        manager.command(PlayerCommand::Start).unwrap();
        assert_eq!(manager.state(), PlaybackState::Running);

        manager.command(PlayerCommand::Pause).unwrap();
        assert_eq!(manager.state(), PlaybackState::Paused);
        manager.command(PlayerCommand::Resume).unwrap();
        assert_eq!(manager.state(), PlaybackState::Running);

        manager.command(PlayerCommand::Stop).unwrap();
        assert_eq!(manager.state(), PlaybackState::Stopped);
        assert_eq!(manager.stats().buffered_frames, 0);
        assert_eq!(manager.stats().video_clock, None);

        // 停止后可以再次开始，复用已打开的源
        manager.command(PlayerCommand::Start).unwrap();
        assert_eq!(manager.state(), PlaybackState::Running);
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut manager = manager(SyntheticSpec::default());
        assert_eq!(manager.volume(), 75);
        manager.set_volume(250);
        assert_eq!(manager.volume(), 100);
        manager.set_volume(0);
        assert_eq!(manager.volume(), 0);
    }

    #[test]
    fn test_audio_toggle_controls_sync_presence() {
        let mut manager = manager(SyntheticSpec {
            audio: true,
            ..SyntheticSpec::default()
        });
        manager.set_source("clip").unwrap();
        manager.clock().update_video_clock(500);
        manager.clock().update_audio_clock(400);
        assert_eq!(manager.clock().av_diff(), Some(100));

        manager.set_audio_enabled(false);
        assert!(!manager.audio_enabled());
        assert_eq!(manager.clock().av_diff(), None);
    }

    #[test]
    fn test_frame_count_query() {
        let backend = SyntheticBackend::new(SyntheticSpec {
            frame_count: 42,
            audio: true,
            ..SyntheticSpec::default()
        });
        let devices = backend.devices_opened();
        let mut manager = PlaybackManager::new(backend, PlayerConfig::default()).unwrap();
        assert_eq!(manager.frame_count("clip").unwrap(), 42);
        assert_eq!(devices.load(Ordering::Relaxed), 0);
        assert!(!manager.is_opened());
    }

    #[test]
    fn test_audio_enabled_before_open_opens_device() {
        let backend = SyntheticBackend::new(SyntheticSpec {
            frame_count: 10,
            audio: true,
            ..SyntheticSpec::default()
        });
        let audio_bytes = backend.audio_bytes_written();
        let config = PlayerConfig {
            audio_enabled: false,
            ..PlayerConfig::default()
        };
        let mut manager = PlaybackManager::new(backend, config).unwrap();
        manager.set_audio_enabled(true);
        manager.set_source("clip").unwrap();
        manager.command(PlayerCommand::Start).unwrap();

        let mut surface = CountingSurface::default();
        assert_eq!(tick_until_event(&mut manager, &mut surface), Some(PlayerEvent::Ready));
        assert!(audio_bytes.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_pause_at_end_still_reports_ready() {
        let mut manager = manager(SyntheticSpec {
            frame_count: 4,
            ..SyntheticSpec::default()
        });
        manager.set_source("clip").unwrap();
        manager.command(PlayerCommand::Start).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.state() == PlaybackState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        // 已结束的会话不能再暂停或恢复成无线程的运行态
        manager.command(PlayerCommand::Pause).unwrap();
        manager.command(PlayerCommand::Resume).unwrap();
        assert_eq!(manager.state(), PlaybackState::Ended);

        let mut surface = CountingSurface::default();
        assert_eq!(tick_until_event(&mut manager, &mut surface), Some(PlayerEvent::Ready));
    }
}
