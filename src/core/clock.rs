use crate::core::TimeBase;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// 时间戳未知的哨兵值
const UNKNOWN_TS: i64 = i64::MIN;

/// 把流时间戳换算成毫秒，输入未知时返回 `None`
///
/// 舍入方式与 `av_rescale_q` 一致：就近舍入，0.5 远离零。
pub fn presentation_time_ms(time_base: TimeBase, pts: Option<i64>) -> Option<i64> {
    let pts = pts?;
    if pts == UNKNOWN_TS || time_base.den == 0 {
        return None;
    }

    let mut num = pts as i128 * time_base.num as i128 * 1000;
    let mut den = time_base.den as i128;
    if den < 0 {
        num = -num;
        den = -den;
    }

    let half = den / 2;
    let ms = if num >= 0 { (num + half) / den } else { (num - half) / den };
    Some(ms.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64)
}

/// 单条流的时钟：`clock` 单调不减，`pts` 为最近一次解码得到的时间戳
///
/// 写端先写 `clock` 再以 Release 写 `pts`，读端以 Acquire 读 `pts`，
/// 保证看到新 `pts` 时 `clock` 也已更新。
#[derive(Debug)]
struct StreamClock {
    clock: AtomicI64,
    pts: AtomicI64,
}

impl StreamClock {
    fn new() -> Self {
        Self {
            clock: AtomicI64::new(UNKNOWN_TS),
            pts: AtomicI64::new(UNKNOWN_TS),
        }
    }

    fn update(&self, pts_ms: i64) {
        // UNKNOWN_TS 是 i64::MIN，fetch_max 在首帧时自然覆盖
        self.clock.fetch_max(pts_ms, Ordering::Relaxed);
        self.pts.store(pts_ms, Ordering::Release);
    }

    fn pts(&self) -> Option<i64> {
        let v = self.pts.load(Ordering::Acquire);
        (v != UNKNOWN_TS).then_some(v)
    }

    fn clock(&self) -> Option<i64> {
        // 与 update() 中 pts 的 Release 写配对
        let _seq = self.pts.load(Ordering::Acquire);
        let v = self.clock.load(Ordering::Relaxed);
        (v != UNKNOWN_TS).then_some(v)
    }

    fn reset(&self) {
        self.clock.store(UNKNOWN_TS, Ordering::Relaxed);
        self.pts.store(UNKNOWN_TS, Ordering::Release);
    }
}

#[derive(Debug)]
struct ClockInner {
    video: StreamClock,
    audio: StreamClock,
    start_time_ms: AtomicU64,      // 0 表示尚未锚定
    sync_threshold_ms: AtomicI64,
    max_frame_delay_ms: AtomicI64, // 仅供参考，不作硬性截断
    frame_drop_count: AtomicU64,
    frame_repeat_count: AtomicU64,
    sync_enabled: AtomicBool,
    audio_present: AtomicBool,
}

/// 音视频同步时钟 - 以音频为主时钟
///
/// 时钟字段只由播放线程写入；丢帧/重复帧判断函数只修改各自的计数器。
#[derive(Clone, Debug)]
pub struct SyncClock {
    inner: Arc<ClockInner>,
}

impl SyncClock {
    pub fn new(sync_threshold_ms: i64, max_frame_delay_ms: i64) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                video: StreamClock::new(),
                audio: StreamClock::new(),
                start_time_ms: AtomicU64::new(0),
                sync_threshold_ms: AtomicI64::new(sync_threshold_ms),
                max_frame_delay_ms: AtomicI64::new(max_frame_delay_ms),
                frame_drop_count: AtomicU64::new(0),
                frame_repeat_count: AtomicU64::new(0),
                sync_enabled: AtomicBool::new(true),
                audio_present: AtomicBool::new(false),
            }),
        }
    }

    /// 更新视频时钟（仅播放线程调用）
    pub fn update_video_clock(&self, pts_ms: i64) {
        self.inner.video.update(pts_ms);
    }

    /// 更新音频时钟（仅播放线程调用）
    pub fn update_audio_clock(&self, pts_ms: i64) {
        self.inner.audio.update(pts_ms);
    }

    /// 用当前墙钟锚定播放起点，只在第一次调用时生效
    pub fn anchor_start_time(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1)
            .max(1);
        self.inner
            .start_time_ms
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn start_time(&self) -> Option<u64> {
        let v = self.inner.start_time_ms.load(Ordering::Acquire);
        (v != 0).then_some(v)
    }

    pub fn video_pts(&self) -> Option<i64> {
        self.inner.video.pts()
    }

    pub fn audio_pts(&self) -> Option<i64> {
        self.inner.audio.pts()
    }

    pub fn video_clock(&self) -> Option<i64> {
        self.inner.video.clock()
    }

    pub fn audio_clock(&self) -> Option<i64> {
        self.inner.audio.clock()
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        self.inner.sync_enabled.store(enabled, Ordering::Release);
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.inner.sync_enabled.load(Ordering::Acquire)
    }

    pub fn set_audio_present(&self, present: bool) {
        self.inner.audio_present.store(present, Ordering::Release);
    }

    pub fn set_sync_threshold(&self, threshold_ms: i64) {
        self.inner
            .sync_threshold_ms
            .store(threshold_ms.max(0), Ordering::Release);
    }

    pub fn sync_threshold(&self) -> i64 {
        self.inner.sync_threshold_ms.load(Ordering::Acquire)
    }

    pub fn max_frame_delay(&self) -> i64 {
        self.inner.max_frame_delay_ms.load(Ordering::Acquire)
    }

    /// 视频相对音频的偏差（毫秒），同步关闭、无音频或任一时钟未知时为 `None`
    pub fn av_diff(&self) -> Option<i64> {
        if !self.is_sync_enabled() || !self.inner.audio_present.load(Ordering::Acquire) {
            return None;
        }
        let video = self.video_pts()?;
        let audio = self.audio_pts()?;
        Some(video.saturating_sub(audio))
    }

    /// 视频落后音频超过阈值时返回 true，并累计丢帧数
    pub fn should_skip_video_frame(&self) -> bool {
        match self.av_diff() {
            Some(diff) if diff < -self.sync_threshold() => {
                self.inner.frame_drop_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// 视频超前音频超过阈值时返回 true，并累计重复帧数
    pub fn should_repeat_video_frame(&self) -> bool {
        match self.av_diff() {
            Some(diff) if diff > self.sync_threshold() => {
                self.inner.frame_repeat_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// 偏差是否已超过最大帧延迟（需要整体重同步而不是逐帧修正）
    pub fn exceeds_max_frame_delay(&self) -> bool {
        self.av_diff()
            .map(|diff| diff.saturating_abs() > self.max_frame_delay())
            .unwrap_or(false)
    }

    pub fn frame_drop_count(&self) -> u64 {
        self.inner.frame_drop_count.load(Ordering::Relaxed)
    }

    pub fn frame_repeat_count(&self) -> u64 {
        self.inner.frame_repeat_count.load(Ordering::Relaxed)
    }

    /// 停止/重播时把两条时钟和起点一起复位为未知
    pub fn reset(&self) {
        self.inner.video.reset();
        self.inner.audio.reset();
        self.inner.start_time_ms.store(0, Ordering::Release);
    }
}

impl Default for SyncClock {
    fn default() -> Self {
        Self::new(40, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_with(video: i64, audio: i64, threshold: i64) -> SyncClock {
        let clock = SyncClock::new(threshold, 100);
        clock.set_audio_present(true);
        clock.update_video_clock(video);
        clock.update_audio_clock(audio);
        clock
    }

    #[test]
    fn test_presentation_time_ms() {
        assert_eq!(presentation_time_ms(TimeBase::new(1, 90000), Some(90000)), Some(1000));
        assert_eq!(presentation_time_ms(TimeBase::new(1, 1000), Some(42)), Some(42));
        // 1/44100 * 22050 = 500ms
        assert_eq!(presentation_time_ms(TimeBase::new(1, 44100), Some(22050)), Some(500));
        // 就近舍入
        assert_eq!(presentation_time_ms(TimeBase::new(1, 3000), Some(2)), Some(1));
        assert_eq!(presentation_time_ms(TimeBase::new(1, 3000), Some(-2)), Some(-1));
        assert_eq!(presentation_time_ms(TimeBase::new(1, 90000), None), None);
        assert_eq!(presentation_time_ms(TimeBase::new(1, 0), Some(5)), None);
    }

    #[test]
    fn test_video_ahead_repeats() {
        let clock = clock_with(500, 400, 30);
        assert!(!clock.should_skip_video_frame());
        assert!(clock.should_repeat_video_frame());
        assert_eq!(clock.frame_repeat_count(), 1);
        assert_eq!(clock.frame_drop_count(), 0);
    }

    #[test]
    fn test_video_behind_skips() {
        let clock = clock_with(100, 400, 30);
        assert!(clock.should_skip_video_frame());
        assert_eq!(clock.frame_drop_count(), 1);
        assert!(!clock.should_repeat_video_frame());
        assert_eq!(clock.frame_repeat_count(), 0);
    }

    #[test]
    fn test_within_threshold_no_action() {
        let clock = clock_with(430, 400, 30);
        assert!(!clock.should_skip_video_frame());
        assert!(!clock.should_repeat_video_frame());

        let clock = clock_with(370, 400, 30);
        assert!(!clock.should_skip_video_frame());
        assert!(!clock.should_repeat_video_frame());
    }

    #[test]
    fn test_unknown_clock_never_acts() {
        let clock = SyncClock::new(30, 100);
        clock.set_audio_present(true);
        clock.update_video_clock(100);
        assert!(!clock.should_skip_video_frame());
        assert!(!clock.should_repeat_video_frame());

        let clock = SyncClock::new(30, 100);
        clock.set_audio_present(true);
        clock.update_audio_clock(5000);
        assert!(!clock.should_skip_video_frame());
        assert!(!clock.should_repeat_video_frame());
        assert_eq!(clock.frame_drop_count() + clock.frame_repeat_count(), 0);
    }

    #[test]
    fn test_disabled_or_no_audio_never_acts() {
        let clock = clock_with(0, 10_000, 30);
        clock.set_sync_enabled(false);
        assert!(!clock.should_skip_video_frame());

        let clock = clock_with(0, 10_000, 30);
        clock.set_audio_present(false);
        assert!(!clock.should_skip_video_frame());
        assert!(!clock.should_repeat_video_frame());
    }

    #[test]
    fn test_skip_and_repeat_are_exclusive() {
        for video in (0..=1000).step_by(25) {
            for audio in (0..=1000).step_by(25) {
                let clock = clock_with(video, audio, 30);
                let skip = clock.should_skip_video_frame();
                let repeat = clock.should_repeat_video_frame();
                assert!(!(skip && repeat), "video={} audio={}", video, audio);
            }
        }
    }

    #[test]
    fn test_clock_is_monotonic_but_pts_tracks_latest() {
        let clock = SyncClock::default();
        clock.update_video_clock(200);
        clock.update_video_clock(120);
        assert_eq!(clock.video_clock(), Some(200));
        assert_eq!(clock.video_pts(), Some(120));
    }

    #[test]
    fn test_clock_never_behind_published_pts() {
        let stream = std::sync::Arc::new(StreamClock::new());
        let writer = {
            let stream = stream.clone();
            std::thread::spawn(move || {
                for pts in 0..2000 {
                    stream.update(pts);
                }
            })
        };
        while !writer.is_finished() {
            if let Some(pts) = stream.pts() {
                assert!(stream.clock().is_some_and(|clock| clock >= pts));
            }
        }
        writer.join().unwrap();
        assert_eq!(stream.clock(), Some(1999));
    }

    #[test]
    fn test_reset_clears_clocks_and_anchor() {
        let clock = clock_with(100, 100, 30);
        assert!(clock.anchor_start_time());
        assert!(!clock.anchor_start_time());
        assert!(clock.start_time().is_some());

        clock.reset();
        assert_eq!(clock.video_pts(), None);
        assert_eq!(clock.audio_clock(), None);
        assert_eq!(clock.start_time(), None);
        assert!(clock.anchor_start_time());
    }

    #[test]
    fn test_exceeds_max_frame_delay() {
        let clock = clock_with(0, 250, 30);
        assert!(clock.exceeds_max_frame_delay());
        let clock = clock_with(0, 50, 30);
        assert!(!clock.exceeds_max_frame_delay());
    }
}
