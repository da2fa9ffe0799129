use crate::core::{SyncClock, VideoFrame};
use crate::player::frame_ring::FrameRing;
use log::debug;
use std::sync::Arc;

/// 显示表面 - 由界面层实现
pub trait DisplaySurface {
    /// 把已转换好的像素交给显示端（替换当前显示的图像）
    fn present(&mut self, frame: &VideoFrame);

    /// 请求重绘
    fn invalidate(&mut self);

    /// 丢弃上游图像缓存（缩放、格式变体等）
    fn drop_cache(&mut self) {}
}

/// 单次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 显示了新的一帧
    Displayed,
    /// 视频领先音频，本帧被丢弃，继续显示上一帧
    Held,
    /// 缓冲区暂时为空，生产者仍在运行
    Idle,
    /// 缓冲区为空且生产者已停止
    EndOfStream,
}

/// 渲染消费端 - 在显示线程上按固定周期调用 `tick()`
pub struct RenderConsumer {
    ring: Arc<FrameRing<VideoFrame>>,
    clock: SyncClock,
    cache_drop_interval: u32,
    presented: u64,
}

impl RenderConsumer {
    pub fn new(ring: Arc<FrameRing<VideoFrame>>, clock: SyncClock, cache_drop_interval: u32) -> Self {
        Self {
            ring,
            clock,
            cache_drop_interval,
            presented: 0,
        }
    }

    /// 处理一个显示周期
    ///
    /// `producer_running` 为播放线程仍在运行（含暂停）的快照。
    pub fn tick<S: DisplaySurface + ?Sized>(&mut self, producer_running: bool, surface: &mut S) -> TickOutcome {
        let Some(frame) = self.ring.pop() else {
            return if producer_running {
                TickOutcome::Idle
            } else {
                TickOutcome::EndOfStream
            };
        };

        if self.clock.should_repeat_video_frame() {
            debug!("🎬 视频领先音频，保持上一帧 (PTS={:?}ms)", frame.pts);
            return TickOutcome::Held;
        }

        surface.present(&frame);
        surface.invalidate();
        self.presented += 1;

        if self.cache_drop_interval > 0 && self.presented % self.cache_drop_interval as u64 == 0 {
            surface.drop_cache();
        }
        TickOutcome::Displayed
    }

    /// 已显示的帧数
    pub fn presented_count(&self) -> u64 {
        self.presented
    }
}
