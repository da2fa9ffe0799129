use crate::core::{
    presentation_time_ms, FrameGeometry, PlaybackState, PlayerError, Result, StreamKind, SyncClock,
    VideoFrame,
};
use crate::player::audio_sink::{apply_volume, AudioSink};
use crate::player::frame_ring::FrameRing;
use crate::player::media_source::{
    AudioFrameMeta, AudioResampler, MediaSource, PcmDevice, PixelConverter, Received,
    VideoFrameMeta,
};
use log::{debug, error, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 启动时为音频重采样输出预留的字节数
const INITIAL_AUDIO_BUF_BYTES: usize = 16 * 1024;

/// 播放线程状态 - 单个原子枚举，避免“暂停但未运行”这类非法组合
#[derive(Debug)]
pub struct PlaybackControl {
    state: AtomicU8,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 线程仍应继续运行（包括暂停中）
    pub fn is_running(&self) -> bool {
        matches!(self.state(), PlaybackState::Running | PlaybackState::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    fn set_running(&self) {
        self.state.store(PlaybackState::Running as u8, Ordering::Release);
    }

    pub fn request_stop(&self) {
        self.state.store(PlaybackState::Stopped as u8, Ordering::Release);
    }

    pub fn pause(&self) -> bool {
        self.transition(PlaybackState::Running, PlaybackState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(PlaybackState::Paused, PlaybackState::Running)
    }

    /// 线程自然结束时调用；运行或暂停中都转为 Ended，已被要求停止时保持 Stopped
    fn finish(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match PlaybackState::from_u8(current) {
                    PlaybackState::Running | PlaybackState::Paused => Some(PlaybackState::Ended as u8),
                    PlaybackState::Stopped | PlaybackState::Ended => None,
                }
            })
            .is_ok()
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

/// 播放线程与控制端共享的状态
pub struct PlaybackShared {
    pub control: PlaybackControl,
    pub clock: SyncClock,
    pub ring: Arc<FrameRing<VideoFrame>>,
    audio_enabled: AtomicBool,
    volume: AtomicU8,
}

impl PlaybackShared {
    pub fn new(clock: SyncClock, ring: Arc<FrameRing<VideoFrame>>, audio_enabled: bool, volume: u8) -> Self {
        Self {
            control: PlaybackControl::new(),
            clock,
            ring,
            audio_enabled: AtomicBool::new(audio_enabled),
            volume: AtomicU8::new(volume.min(100)),
        }
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Acquire)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Release);
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(100), Ordering::Release);
    }
}

/// 播放线程独占的协作者，线程退出时通过 JoinHandle 交还
pub struct ProducerParts<S, C, R, D> {
    pub source: S,
    pub converter: C,
    pub resampler: Option<R>,
    pub sink: AudioSink<D>,
}

/// 线程节奏参数
#[derive(Debug, Clone, Copy)]
pub struct ThreadTiming {
    pub pause_poll: Duration,
    pub read_retry_backoff: Duration,
}

impl Default for ThreadTiming {
    fn default() -> Self {
        Self {
            pause_poll: Duration::from_millis(10),
            read_retry_backoff: Duration::from_millis(10),
        }
    }
}

/// 单次包处理的结果
enum Flow {
    Continue,
    /// 会话级错误，停止产帧
    Abort,
}

/// 播放线程管理器
/// - 线程循环读包、解码、驱动时钟、把视频帧推入环形缓冲区、把音频写入设备
/// - stop() 会等待线程退出（join），之后才能释放共享状态
pub struct PlaybackThread<S, C, R, D> {
    handle: Option<JoinHandle<ProducerParts<S, C, R, D>>>,
    shared: Arc<PlaybackShared>,
}

impl<S, C, R, D> PlaybackThread<S, C, R, D>
where
    S: MediaSource,
    C: PixelConverter<S::VideoFrame>,
    R: AudioResampler<S::AudioFrame>,
    D: PcmDevice,
{
    /// 启动播放线程
    pub fn start(
        parts: ProducerParts<S, C, R, D>,
        shared: Arc<PlaybackShared>,
        timing: ThreadTiming,
    ) -> Result<Self> {
        shared.control.set_running();

        let thread_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name("myy-playback".to_string())
            .spawn(move || Producer::new(parts, thread_shared, timing).run());

        match spawned {
            Ok(handle) => Ok(Self {
                handle: Some(handle),
                shared,
            }),
            Err(e) => {
                shared.control.request_stop();
                Err(PlayerError::ThreadError(e.to_string()))
            }
        }
    }

    /// 线程是否已经退出循环
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// 停止线程并取回它持有的协作者
    /// - 清除运行标志
    /// - join 线程（线程在下一次循环顶部或暂停睡眠醒来时退出）
    pub fn stop(&mut self) -> Option<ProducerParts<S, C, R, D>> {
        info!("{} 🛑 PlaybackThread::stop() called", log_ctx());
        self.shared.control.request_stop();

        let handle = self.handle.take()?;
        match handle.join() {
            Ok(parts) => Some(parts),
            Err(_) => {
                error!("{} ❌ 播放线程异常退出，会话资源已丢失", log_ctx());
                None
            }
        }
    }
}

impl<S, C, R, D> Drop for PlaybackThread<S, C, R, D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("{} ⚠ PlaybackThread 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.shared.control.request_stop();
            let _ = handle.join();
        }
    }
}

/// 播放线程本体（在独立线程中运行）
struct Producer<S, C, R, D> {
    parts: ProducerParts<S, C, R, D>,
    shared: Arc<PlaybackShared>,
    timing: ThreadTiming,
    pixels: Vec<u8>,
    audio_buf: Vec<u8>,
    geometry: Option<FrameGeometry>,
    video_packets: usize,
    audio_packets: usize,
}

impl<S, C, R, D> Producer<S, C, R, D>
where
    S: MediaSource,
    C: PixelConverter<S::VideoFrame>,
    R: AudioResampler<S::AudioFrame>,
    D: PcmDevice,
{
    fn new(parts: ProducerParts<S, C, R, D>, shared: Arc<PlaybackShared>, timing: ThreadTiming) -> Self {
        Self {
            parts,
            shared,
            timing,
            pixels: Vec::new(),
            audio_buf: Vec::new(),
            geometry: None,
            video_packets: 0,
            audio_packets: 0,
        }
    }

    /// 预分配本线程的暂存缓冲区
    fn allocate_scratch(&mut self) -> Result<()> {
        let info = self.parts.source.info();
        let frame_bytes = info.width as usize * info.height as usize * 4;
        self.pixels
            .try_reserve(frame_bytes)
            .map_err(|e| PlayerError::ConvertError(format!("视频暂存缓冲区分配失败: {}", e)))?;

        if self.parts.resampler.is_some() {
            self.audio_buf
                .try_reserve(INITIAL_AUDIO_BUF_BYTES)
                .map_err(|e| PlayerError::AudioError(format!("音频暂存缓冲区分配失败: {}", e)))?;
        }
        Ok(())
    }

    fn run(mut self) -> ProducerParts<S, C, R, D> {
        info!("{} 🎬 播放线程启动: {}", log_ctx(), self.parts.source.description());

        if let Err(e) = self.allocate_scratch() {
            error!("{} ❌ {}，播放线程退出", log_ctx(), e);
            self.shared.control.finish();
            return self.parts;
        }

        const LOG_FIRST_N: usize = 5;

        loop {
            match self.shared.control.state() {
                PlaybackState::Stopped | PlaybackState::Ended => break,
                PlaybackState::Paused => {
                    thread::sleep(self.timing.pause_poll);
                    continue;
                }
                PlaybackState::Running => {}
            }

            let (kind, packet) = match self.parts.source.read_packet() {
                Ok(Some(read)) => read,
                Ok(None) => {
                    info!("{} 📄 到达文件末尾", log_ctx());
                    self.shared.control.finish();
                    break;
                }
                Err(e) => {
                    warn!("{} ⚠️  读取包失败: {}，稍后重试", log_ctx(), e);
                    thread::sleep(self.timing.read_retry_backoff);
                    continue;
                }
            };

            match kind {
                StreamKind::Video => {
                    self.video_packets += 1;
                    if self.video_packets <= LOG_FIRST_N || self.video_packets % 100 == 0 {
                        info!("{} 📦 读取视频包 #{}", log_ctx(), self.video_packets);
                    }
                    if let Flow::Abort = self.handle_video_packet(&packet) {
                        self.shared.control.finish();
                        break;
                    }
                }
                StreamKind::Audio => {
                    self.audio_packets += 1;
                    if self.audio_packets <= LOG_FIRST_N || self.audio_packets % 100 == 0 {
                        info!("{} 🔊 读取音频包 #{}", log_ctx(), self.audio_packets);
                    }
                    self.handle_audio_packet(&packet);
                }
                StreamKind::Other => {
                    // 忽略字幕/数据包
                }
            }
        }

        info!(
            "{} 🛑 播放线程退出（共 {} 视频包，{} 音频包，丢帧 {}）",
            log_ctx(),
            self.video_packets,
            self.audio_packets,
            self.shared.clock.frame_drop_count()
        );
        self.parts
    }

    fn handle_video_packet(&mut self, packet: &S::Packet) -> Flow {
        if let Err(e) = self.parts.source.submit_packet(StreamKind::Video, packet) {
            warn!("{} ⚠️  视频包送入解码器失败（已跳过）: {}", log_ctx(), e);
            return Flow::Continue;
        }

        let time_base = self.parts.source.info().video_time_base;
        let clock = &self.shared.clock;

        loop {
            let frame = match self.parts.source.receive_video_frame() {
                Ok(Received::Frame(frame)) => frame,
                Ok(Received::Again) | Ok(Received::EndOfStream) => break,
                Err(e) => {
                    warn!("{} ⚠️  视频解码失败（已跳过）: {}", log_ctx(), e);
                    break;
                }
            };

            // flush 期间解码器可能吐出尺寸为 0 或格式未知的空帧
            let geometry = frame.geometry();
            if !geometry.is_valid() {
                debug!("🎬 丢弃无效视频帧: {}", geometry);
                continue;
            }
            match self.geometry {
                None => self.geometry = Some(geometry),
                Some(expected) if expected != geometry => {
                    error!(
                        "{} ❌ {}，终止本次会话",
                        log_ctx(),
                        PlayerError::GeometryChanged {
                            old: expected.to_string(),
                            new: geometry.to_string(),
                        }
                    );
                    return Flow::Abort;
                }
                Some(_) => {}
            }

            let pts_ms = presentation_time_ms(time_base, frame.pts());
            if let Some(pts) = pts_ms {
                clock.update_video_clock(pts);
            }
            if clock.anchor_start_time() {
                info!("🎬 首个有效视频帧: PTS={:?}ms，锚定播放起点", pts_ms);
            }

            if clock.should_skip_video_frame() {
                if clock.exceeds_max_frame_delay() {
                    warn!("🎬 视频严重落后音频 {:?}ms", clock.av_diff());
                } else {
                    debug!("🎬 视频落后音频，丢弃帧 PTS={:?}ms", pts_ms);
                }
                continue;
            }

            let layout = match self.parts.converter.convert(&frame, &mut self.pixels) {
                Ok(layout) => layout,
                Err(e) => {
                    warn!("{} ⚠️  像素转换失败（已跳过）: {}", log_ctx(), e);
                    continue;
                }
            };
            let Some(pixels) = self.pixels.get(..layout.data_size()) else {
                warn!("{} ⚠️  像素数据不足 {} 字节（已跳过）", log_ctx(), layout.data_size());
                continue;
            };

            let video_frame = VideoFrame {
                pts: pts_ms,
                layout,
                data: Arc::from(pixels),
            };
            match self.shared.ring.push(&video_frame) {
                Ok(Some(evicted)) => {
                    debug!("🎬 帧缓冲已满，淘汰最旧帧 PTS={:?}ms", evicted.pts);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{} ⚠️  {}，停止产帧", log_ctx(), e);
                    return Flow::Abort;
                }
            }
        }

        Flow::Continue
    }

    fn handle_audio_packet(&mut self, packet: &S::Packet) {
        if !self.shared.audio_enabled() || !self.parts.sink.has_device() {
            return;
        }
        let Some(resampler) = self.parts.resampler.as_mut() else {
            return;
        };

        if let Err(e) = self.parts.source.submit_packet(StreamKind::Audio, packet) {
            warn!("{} ⚠️  音频包送入解码器失败（已跳过）: {}", log_ctx(), e);
            return;
        }

        let time_base = self.parts.source.info().audio_time_base;
        let bytes_per_frame = resampler.output_format().bytes_per_frame();

        loop {
            let frame = match self.parts.source.receive_audio_frame() {
                Ok(Received::Frame(frame)) => frame,
                Ok(Received::Again) | Ok(Received::EndOfStream) => break,
                Err(e) => {
                    warn!("{} ⚠️  音频解码失败（已跳过）: {}", log_ctx(), e);
                    break;
                }
            };

            if let Some(pts) = time_base.and_then(|tb| presentation_time_ms(tb, frame.pts())) {
                self.shared.clock.update_audio_clock(pts);
            }

            let needed = resampler.estimate_output_samples(&frame) * bytes_per_frame;
            if needed > self.audio_buf.len() {
                if let Err(e) = self.audio_buf.try_reserve(needed - self.audio_buf.len()) {
                    warn!("{} ⚠️  音频缓冲扩容失败（已跳过本帧）: {}", log_ctx(), e);
                    continue;
                }
                self.audio_buf.resize(needed, 0);
            }

            let samples = match resampler.resample(&frame, &mut self.audio_buf[..needed]) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("{} ⚠️  重采样失败（已跳过）: {}", log_ctx(), e);
                    continue;
                }
            };
            if samples == 0 {
                continue;
            }

            let bytes = (samples * bytes_per_frame).min(needed);
            let pcm = &mut self.audio_buf[..bytes];
            apply_volume(pcm, self.shared.volume());
            if let Err(e) = self.parts.sink.write(pcm) {
                warn!("{} ⚠️  音频写入失败（已跳过）: {}", log_ctx(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaInfo;
    use crate::player::synthetic::{
        NullPcmDevice, SyntheticAudioFrame, SyntheticConverter, SyntheticPacket, SyntheticResampler,
        SyntheticSource, SyntheticSpec, SyntheticVideoFrame,
    };
    use std::time::Instant;

    type TestThread = PlaybackThread<SyntheticSource, SyntheticConverter, SyntheticResampler, NullPcmDevice>;

    fn shared(capacity: usize) -> Arc<PlaybackShared> {
        let ring = Arc::new(FrameRing::new(capacity).unwrap());
        Arc::new(PlaybackShared::new(SyncClock::new(40, 100), ring, true, 100))
    }

    fn parts(spec: SyntheticSpec) -> ProducerParts<SyntheticSource, SyntheticConverter, SyntheticResampler, NullPcmDevice> {
        let has_audio = spec.audio;
        ProducerParts {
            source: SyntheticSource::new(spec),
            converter: SyntheticConverter::default(),
            resampler: has_audio.then(SyntheticResampler::default),
            sink: AudioSink::new(has_audio.then(NullPcmDevice::default)),
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_natural_end_marks_thread_ended() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 10,
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();

        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        // 线程自己清除运行标志，消费端据此判断播放结束
        assert_eq!(shared.control.state(), PlaybackState::Ended);
        assert!(!shared.control.is_running());
        assert_eq!(shared.ring.len(), 10);

        let parts = thread.stop().unwrap();
        assert_eq!(parts.sink.bytes_written(), 0);
    }

    #[test]
    fn test_frames_arrive_in_pts_order() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 8,
            fps: 25,
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        thread.stop();

        let pts: Vec<Option<i64>> = std::iter::from_fn(|| shared.ring.pop()).map(|f| f.pts).collect();
        let expected: Vec<Option<i64>> = (0..8).map(|i| Some(i * 40)).collect();
        assert_eq!(pts, expected);
        assert_eq!(shared.clock.video_clock(), Some(280));
        assert!(shared.clock.start_time().is_some());
    }

    #[test]
    fn test_invalid_frames_are_discarded() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 6,
            invalid_every: Some(2),
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        thread.stop();
        assert_eq!(shared.ring.len(), 3);
    }

    #[test]
    fn test_geometry_change_aborts_session() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 20,
            resize_at: Some(4),
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        assert_eq!(shared.control.state(), PlaybackState::Ended);
        thread.stop();
        assert_eq!(shared.ring.len(), 4);
    }

    #[test]
    fn test_audio_written_to_sink() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 10,
            audio: true,
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        let parts = thread.stop().unwrap();

        assert!(parts.sink.bytes_written() > 0);
        assert!(shared.clock.audio_clock().is_some());
    }

    #[test]
    fn test_audio_disabled_discards_packets() {
        let shared = shared(64);
        shared.set_audio_enabled(false);
        let spec = SyntheticSpec {
            frame_count: 10,
            audio: true,
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        let parts = thread.stop().unwrap();

        assert_eq!(parts.sink.bytes_written(), 0);
        assert_eq!(shared.clock.audio_clock(), None);
        assert_eq!(shared.ring.len(), 10);
    }

    #[test]
    fn test_stop_while_paused_joins_promptly() {
        let shared = shared(4);
        let spec = SyntheticSpec {
            frame_count: u64::MAX,
            ..SyntheticSpec::default()
        };
        let timing = ThreadTiming {
            pause_poll: Duration::from_millis(10),
            ..ThreadTiming::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), timing).unwrap();

        assert!(shared.control.pause());
        thread::sleep(Duration::from_millis(30));
        // 暂停期间不读包
        let evicted = shared.ring.evicted_count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(shared.ring.evicted_count(), evicted);

        let started = Instant::now();
        assert!(thread.stop().is_some());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(shared.control.state(), PlaybackState::Stopped);
    }

    /// 到达输入末尾时先通知测试并等待放行，再返回 `Ok(None)`
    struct GatedSource {
        inner: SyntheticSource,
        at_end: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl MediaSource for GatedSource {
        type Packet = SyntheticPacket;
        type VideoFrame = SyntheticVideoFrame;
        type AudioFrame = SyntheticAudioFrame;

        fn info(&self) -> &MediaInfo {
            self.inner.info()
        }

        fn read_packet(&mut self) -> Result<Option<(StreamKind, SyntheticPacket)>> {
            let read = self.inner.read_packet()?;
            if read.is_none() {
                let _ = self.at_end.send(());
                let _ = self.release.recv_timeout(Duration::from_secs(5));
            }
            Ok(read)
        }

        fn submit_packet(&mut self, kind: StreamKind, packet: &SyntheticPacket) -> Result<()> {
            self.inner.submit_packet(kind, packet)
        }

        fn receive_video_frame(&mut self) -> Result<Received<SyntheticVideoFrame>> {
            self.inner.receive_video_frame()
        }

        fn receive_audio_frame(&mut self) -> Result<Received<SyntheticAudioFrame>> {
            self.inner.receive_audio_frame()
        }

        fn rewind(&mut self) -> Result<()> {
            self.inner.rewind()
        }

        fn description(&self) -> String {
            self.inner.description()
        }
    }

    #[test]
    fn test_pause_at_end_of_input_still_ends() {
        let shared = shared(64);
        let (at_end_tx, at_end_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let parts = ProducerParts {
            source: GatedSource {
                inner: SyntheticSource::new(SyntheticSpec {
                    frame_count: 3,
                    ..SyntheticSpec::default()
                }),
                at_end: at_end_tx,
                release: release_rx,
            },
            converter: SyntheticConverter::default(),
            resampler: None::<SyntheticResampler>,
            sink: AudioSink::<NullPcmDevice>::new(None),
        };
        let mut thread = PlaybackThread::start(parts, shared.clone(), ThreadTiming::default()).unwrap();

        at_end_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // 暂停恰好落在最后一次读包期间
        assert!(shared.control.pause());
        release_tx.send(()).unwrap();

        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        assert_eq!(shared.control.state(), PlaybackState::Ended);
        assert!(!shared.control.resume());
        assert!(!shared.control.is_running());
        thread.stop();
    }

    #[test]
    fn test_read_error_is_retried() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 6,
            fps: 25,
            read_error_at: Some(2),
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        assert_eq!(shared.control.state(), PlaybackState::Ended);
        thread.stop();

        // 读包失败后退避重试，不丢帧也不提前结束
        let pts: Vec<Option<i64>> = std::iter::from_fn(|| shared.ring.pop()).map(|f| f.pts).collect();
        let expected: Vec<Option<i64>> = (0..6).map(|i| Some(i * 40)).collect();
        assert_eq!(pts, expected);
    }

    #[test]
    fn test_submit_error_skips_packet() {
        let shared = shared(64);
        let spec = SyntheticSpec {
            frame_count: 6,
            fps: 25,
            submit_error_at: Some(3),
            ..SyntheticSpec::default()
        };
        let mut thread: TestThread = PlaybackThread::start(parts(spec), shared.clone(), ThreadTiming::default()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.is_finished()));
        assert_eq!(shared.control.state(), PlaybackState::Ended);
        thread.stop();

        let pts: Vec<Option<i64>> = std::iter::from_fn(|| shared.ring.pop()).map(|f| f.pts).collect();
        assert_eq!(pts, vec![Some(0), Some(40), Some(80), Some(160), Some(200)]);
    }

    #[test]
    fn test_finish_from_paused() {
        let control = PlaybackControl::new();
        control.set_running();
        assert!(control.pause());
        assert!(control.finish());
        assert_eq!(control.state(), PlaybackState::Ended);
        assert!(!control.resume());
        assert!(!control.finish());
    }

    #[test]
    fn test_pause_resume_transitions() {
        let control = PlaybackControl::new();
        assert!(!control.pause());
        control.set_running();
        assert!(control.pause());
        assert!(control.is_paused());
        assert!(control.is_running());
        assert!(control.resume());
        assert!(!control.is_paused());
        control.request_stop();
        assert!(!control.finish());
        assert_eq!(control.state(), PlaybackState::Stopped);
    }
}
